//! Fan-out across connectors and merge of their results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use vigil_core::config::ConnectorsConfig;
use vigil_core::{
    AlertRecord, ConnectorError, ConnectorErrorKind, ConnectorResult, MetricPoint, Query,
    QueryKind,
};

use crate::cache::{CacheKey, ResultCache};
use crate::connector::{Connector, MonitoringBackend};

/// One connector that did not contribute to a merged result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorFailure {
    pub connector: String,
    pub error: ConnectorError,
}

/// Union of every connector's answer to one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedResult {
    pub kind: QueryKind,
    pub metrics: Vec<MetricPoint>,
    pub alerts: Vec<AlertRecord>,
    pub services: Vec<String>,
    pub connectors_queried: Vec<String>,
    pub connectors_answered: Vec<String>,
    pub connectors_failed: Vec<ConnectorFailure>,
}

impl MergedResult {
    pub fn empty(kind: QueryKind) -> Self {
        Self {
            kind,
            metrics: Vec::new(),
            alerts: Vec::new(),
            services: Vec::new(),
            connectors_queried: Vec::new(),
            connectors_answered: Vec::new(),
            connectors_failed: Vec::new(),
        }
    }

    /// No connector answered, either because all failed or none were
    /// registered for the kind.
    pub fn is_total_failure(&self) -> bool {
        self.connectors_answered.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.metrics.len() + self.alerts.len() + self.services.len()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.connectors_failed
            .iter()
            .map(|f| f.connector.as_str())
            .collect()
    }
}

/// Per-connector inventory for the metrics summary endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectorSummary {
    pub services: Vec<String>,
    pub metric_names: Vec<String>,
    pub service_count: usize,
    pub metric_count: usize,
    pub error: Option<String>,
}

/// Number of metric names carried in a summary.
const SUMMARY_METRIC_NAMES: usize = 50;

/// Recent health check results, reused by fan-outs for `ttl`.
struct HealthMemo {
    ttl: Duration,
    results: Mutex<HashMap<String, (bool, Instant)>>,
}

impl HealthMemo {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            results: Mutex::new(HashMap::new()),
        }
    }

    fn results(&self) -> MutexGuard<'_, HashMap<String, (bool, Instant)>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, connector: &str) -> Option<bool> {
        match self.results().get(connector) {
            Some(&(healthy, checked_at)) if checked_at.elapsed() < self.ttl => Some(healthy),
            _ => None,
        }
    }

    fn record(&self, connector: &str, healthy: bool) {
        if !self.ttl.is_zero() {
            self.results()
                .insert(connector.to_string(), (healthy, Instant::now()));
        }
    }

    fn forget(&self, connector: &str) {
        self.results().remove(connector);
    }
}

pub struct ConnectorManager {
    connectors: Vec<Arc<Connector>>,
    cache: Arc<ResultCache>,
    call_timeout: Duration,
    fanout_deadline: Duration,
    health: HealthMemo,
}

impl ConnectorManager {
    pub fn new(connectors: Vec<Connector>, cache: Arc<ResultCache>, config: &ConnectorsConfig) -> Self {
        let names: Vec<&str> = connectors.iter().map(|c| c.name()).collect();
        info!(connectors = ?names, "Connector manager initialized");
        Self {
            connectors: connectors.into_iter().map(Arc::new).collect(),
            cache,
            call_timeout: config.call_timeout(),
            fanout_deadline: config.fanout_deadline(),
            health: HealthMemo::new(config.health_ttl()),
        }
    }

    pub fn connector_names(&self) -> Vec<String> {
        self.connectors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn connector(&self, name: &str) -> Option<&Connector> {
        self.connectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn fanout_deadline(&self) -> Duration {
        self.fanout_deadline
    }

    /// Fan `query` out under the configured fan-out deadline.
    pub async fn execute(&self, query: &Query) -> MergedResult {
        self.execute_within(query, self.fanout_deadline).await
    }

    /// Fan `query` out to every capable, healthy connector and merge what
    /// comes back before `deadline`.
    ///
    /// Never fails: connectors that are unhealthy, error out, or miss the
    /// deadline are listed in `connectors_failed`.
    pub async fn execute_within(&self, query: &Query, deadline: Duration) -> MergedResult {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let selected: Vec<&Arc<Connector>> = self
            .connectors
            .iter()
            .filter(|c| c.supports(query.kind))
            .collect();

        let mut merged = MergedResult::empty(query.kind);
        merged.connectors_queried = selected.iter().map(|c| c.name().to_string()).collect();
        if selected.is_empty() {
            warn!(kind = %query.kind, "No connector registered for query kind");
            return merged;
        }

        let probe_until = deadline_at.min(started + self.call_timeout);
        let health = join_all(selected.iter().map(|c| async move {
            if let Some(healthy) = self.health.get(c.name()) {
                return healthy;
            }
            let healthy = timeout_at(probe_until, c.health_check())
                .await
                .unwrap_or(false);
            self.health.record(c.name(), healthy);
            healthy
        }))
        .await;

        let mut outcomes: HashMap<String, ConnectorResult> = HashMap::new();
        let mut pending = FuturesUnordered::new();
        for (connector, healthy) in selected.iter().zip(health) {
            if healthy {
                pending.push(async move {
                    let result = self.dispatch(connector, query).await;
                    (connector.name().to_string(), result)
                });
            } else {
                outcomes.insert(
                    connector.name().to_string(),
                    ConnectorError::unavailable(format!("{} failed its health check", connector.name()))
                        .into(),
                );
            }
        }

        loop {
            match timeout_at(deadline_at, pending.next()).await {
                Ok(Some((name, result))) => {
                    outcomes.insert(name, result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        kind = %query.kind,
                        deadline_ms = deadline.as_millis() as u64,
                        "Fan-out deadline reached with calls still pending"
                    );
                    break;
                }
            }
        }
        drop(pending);

        for connector in &selected {
            let name = connector.name().to_string();
            let result = outcomes.remove(&name).unwrap_or_else(|| {
                ConnectorError::timeout(format!(
                    "{} did not answer within {}ms",
                    name,
                    deadline.as_millis()
                ))
                .into()
            });
            if let ConnectorResult::Error(e) = &result {
                if matches!(e.kind, ConnectorErrorKind::Timeout | ConnectorErrorKind::Unavailable) {
                    // Probe again next time instead of trusting a stale "up".
                    self.health.forget(&name);
                }
            }
            absorb(&mut merged, name, result);
        }
        finish(&mut merged, query.limit);

        debug!(
            kind = %query.kind,
            answered = merged.connectors_answered.len(),
            failed = merged.connectors_failed.len(),
            records = merged.record_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fan-out complete"
        );
        merged
    }

    async fn dispatch(&self, connector: &Connector, query: &Query) -> ConnectorResult {
        let key = CacheKey::new(connector.name(), query.clone());
        let ttl = self.cache.ttl_for(query.kind);
        let call_timeout = self.call_timeout;
        self.cache
            .get_or_fetch(key, ttl, || async move {
                let started = Instant::now();
                let result = match timeout(call_timeout, connector.query(query)).await {
                    Ok(result) => result,
                    Err(_) => ConnectorError::timeout(format!(
                        "{} did not answer within {}ms",
                        connector.name(),
                        call_timeout.as_millis()
                    ))
                    .into(),
                };
                debug!(
                    connector = connector.name(),
                    kind = %query.kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = result.is_error(),
                    "Connector call finished"
                );
                result
            })
            .await
    }

    /// Probe every connector.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let results = join_all(self.connectors.iter().map(|c| async move {
            let healthy = timeout(self.call_timeout, c.health_check())
                .await
                .unwrap_or(false);
            self.health.record(c.name(), healthy);
            (c.name().to_string(), healthy)
        }))
        .await;
        results.into_iter().collect()
    }

    /// Service inventory per connector, cached with the services TTL.
    pub async fn services_by_connector(&self) -> BTreeMap<String, Result<Vec<String>, ConnectorError>> {
        let query = Query::new(QueryKind::Services);
        let capable = self
            .connectors
            .iter()
            .filter(|c| c.supports(QueryKind::Services));
        let results = join_all(capable.map(|c| {
            let query = &query;
            async move {
                let result = self.dispatch(c, query).await;
                let services = match result {
                    ConnectorResult::Services(s) => Ok(s),
                    ConnectorResult::Error(e) => Err(e),
                    _ => Err(ConnectorError::malformed(format!(
                        "{} answered a services query with another kind",
                        c.name()
                    ))),
                };
                (c.name().to_string(), services)
            }
        }))
        .await;
        results.into_iter().collect()
    }

    /// Services and metric names per connector.
    pub async fn metrics_summaries(&self) -> BTreeMap<String, ConnectorSummary> {
        let services = self.services_by_connector().await;
        let names = join_all(self.connectors.iter().map(|c| async move {
            let names = match timeout(self.call_timeout, c.list_metric_names()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectorError::timeout(format!(
                    "{} did not list metrics within {}ms",
                    c.name(),
                    self.call_timeout.as_millis()
                ))),
            };
            (c.name().to_string(), names)
        }))
        .await;

        let mut summaries = BTreeMap::new();
        for (name, metric_names) in names {
            let mut summary = ConnectorSummary::default();
            let mut errors = Vec::new();
            match services.get(&name) {
                Some(Ok(s)) => summary.services = s.clone(),
                Some(Err(e)) => errors.push(e.to_string()),
                None => {}
            }
            match metric_names {
                Ok(mut m) => {
                    summary.metric_count = m.len();
                    m.truncate(SUMMARY_METRIC_NAMES);
                    summary.metric_names = m;
                }
                Err(e) => errors.push(e.to_string()),
            }
            summary.service_count = summary.services.len();
            if !errors.is_empty() {
                summary.error = Some(errors.join("; "));
            }
            summaries.insert(name, summary);
        }
        summaries
    }
}

/// Fold one connector's result into the merge.
fn absorb(merged: &mut MergedResult, connector: String, result: ConnectorResult) {
    match (merged.kind, result) {
        (_, ConnectorResult::Error(error)) => {
            warn!(connector = %connector, error = %error, "Connector failed");
            merged
                .connectors_failed
                .push(ConnectorFailure { connector, error });
            return;
        }
        (QueryKind::Metrics, ConnectorResult::Metrics(points)) => {
            merged.metrics.extend(points.into_iter().map(|mut p| {
                p.source_connector = connector.clone();
                p
            }));
        }
        (QueryKind::Alerts, ConnectorResult::Alerts(alerts)) => merged.alerts.extend(alerts),
        (QueryKind::Services, ConnectorResult::Services(services)) => {
            merged.services.extend(services)
        }
        (kind, _) => {
            let error = ConnectorError::malformed(format!(
                "{} answered a {} query with another kind",
                connector, kind
            ));
            merged
                .connectors_failed
                .push(ConnectorFailure { connector, error });
            return;
        }
    }
    merged.connectors_answered.push(connector);
}

/// Order and bound the merged records.
fn finish(merged: &mut MergedResult, limit: usize) {
    merged.alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    merged.alerts.truncate(limit);
    merged.metrics.truncate(limit);
    let unique: BTreeSet<String> = merged.services.drain(..).collect();
    merged.services = unique.into_iter().collect();
}
