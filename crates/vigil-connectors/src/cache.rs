//! TTL result cache with single-flight fetches.
//!
//! Keys are `(connector name, query)`. While a key has no fresh entry, the
//! first caller installs an in-flight cell and runs the fetch; every other
//! caller for that key awaits the same cell. Only successful payloads are
//! retained. Errors reach the callers that were waiting and are then dropped
//! so the next turn retries the backend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_core::config::CacheConfig;
use vigil_core::{ConnectorResult, Query, QueryKind};

use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub connector: String,
    pub query: Query,
}

impl CacheKey {
    pub fn new(connector: impl Into<String>, query: Query) -> Self {
        Self {
            connector: connector.into(),
            query,
        }
    }
}

struct CacheEntry {
    value: ConnectorResult,
    expires_at: Instant,
}

enum Slot {
    Ready(CacheEntry),
    InFlight(Arc<OnceCell<ConnectorResult>>),
}

enum Lookup {
    Hit(ConnectorResult),
    Wait(Arc<OnceCell<ConnectorResult>>),
}

/// Counters exposed on the metrics summary endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
}

/// Per-kind time-to-live policy.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub metrics: Duration,
    pub alerts: Duration,
    pub services: Duration,
}

impl CacheTtls {
    pub fn for_kind(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::Metrics => self.metrics,
            QueryKind::Alerts => self.alerts,
            QueryKind::Services => self.services,
        }
    }
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            metrics: Duration::from_secs(config.metrics_ttl_secs),
            alerts: Duration::from_secs(config.alerts_ttl_secs),
            services: Duration::from_secs(config.services_ttl_secs),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

pub struct ResultCache {
    enabled: bool,
    ttls: CacheTtls,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

impl ResultCache {
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            enabled: true,
            ttls,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(CacheTtls::from(config))
        }
    }

    /// A cache that stores nothing; every lookup goes to the backend.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(CacheTtls::default())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl_for(&self, kind: QueryKind) -> Duration {
        self.ttls.for_kind(kind)
    }

    /// Return the cached result for `key`, or run `fetch` to produce it.
    ///
    /// At most one `fetch` runs per key at a time. If the cache cannot be
    /// used the fetch runs directly and nothing is stored.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, ttl: Duration, fetch: F) -> ConnectorResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult>,
    {
        let cell = match self.claim(&key) {
            Ok(Lookup::Hit(result)) => {
                debug!(connector = %key.connector, kind = %key.query.kind, "Cache hit");
                return result;
            }
            Ok(Lookup::Wait(cell)) => cell,
            Err(e) => {
                debug!(connector = %key.connector, error = %e, "Bypassing cache");
                self.fetches.fetch_add(1, Ordering::Relaxed);
                return fetch().await;
            }
        };

        let result = cell
            .get_or_init(|| async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                debug!(connector = %key.connector, kind = %key.query.kind, "Cache miss, fetching");
                fetch().await
            })
            .await
            .clone();

        self.settle(&key, &cell, &result, ttl);
        result
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, Slot>>, CacheError> {
        self.slots
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("cache lock poisoned: {}", e)))
    }

    fn claim(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        if !self.enabled {
            return Err(CacheError::Unavailable("cache disabled".to_string()));
        }
        let mut slots = self.lock()?;
        match slots.get(key) {
            Some(Slot::Ready(entry)) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Lookup::Hit(entry.value.clone()));
            }
            Some(Slot::InFlight(cell)) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(Lookup::Wait(Arc::clone(cell)));
            }
            _ => {}
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(OnceCell::new());
        slots.insert(key.clone(), Slot::InFlight(Arc::clone(&cell)));
        Ok(Lookup::Wait(cell))
    }

    /// Replace the in-flight marker once its cell is filled. Idempotent: only
    /// the first waiter to get here finds its own cell still installed.
    fn settle(
        &self,
        key: &CacheKey,
        cell: &Arc<OnceCell<ConnectorResult>>,
        result: &ConnectorResult,
        ttl: Duration,
    ) {
        let mut slots = match self.lock() {
            Ok(slots) => slots,
            Err(e) => {
                warn!(error = %e, "Could not store fetched result");
                return;
            }
        };
        let ours = matches!(slots.get(key), Some(Slot::InFlight(c)) if Arc::ptr_eq(c, cell));
        if !ours {
            return;
        }
        if result.is_error() {
            slots.remove(key);
        } else {
            slots.insert(
                key.clone(),
                Slot::Ready(CacheEntry {
                    value: result.clone(),
                    expires_at: Instant::now() + ttl,
                }),
            );
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut slots) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => entry.expires_at > now,
            Slot::InFlight(_) => true,
        });
        before - slots.len()
    }

    /// Whether the cache can currently be used.
    pub fn ping(&self) -> Result<(), CacheError> {
        self.lock().map(|_| ())
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = match self.lock() {
            Ok(slots) => slots.values().fold((0, 0), |(r, f), slot| match slot {
                Slot::Ready(_) => (r + 1, f),
                Slot::InFlight(_) => (r, f + 1),
            }),
            Err(_) => (0, 0),
        };
        CacheStats {
            entries,
            in_flight,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheTtls::default())
    }
}
