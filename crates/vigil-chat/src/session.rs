//! Session persistence.
//!
//! The engine talks to sessions only through [`SessionStore`], so a shared
//! external store can replace the in-memory one without touching the turn
//! pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use crate::error::SessionError;
use crate::types::Session;

/// Keyed session storage with idle expiry.
pub trait SessionStore: Send + Sync {
    /// Fetch a copy of the session. Expired sessions yield `Expired`.
    fn get(&self, id: &str) -> Result<Session, SessionError>;

    /// Insert or replace a session.
    fn put(&self, session: Session) -> Result<(), SessionError>;

    /// Remove a session. `Ok(false)` when it did not exist.
    fn remove(&self, id: &str) -> Result<bool, SessionError>;

    /// Drop every expired session, returning how many were removed.
    fn sweep_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the store is usable.
    fn ping(&self) -> Result<(), SessionError>;
}

/// Process-local store guarded by a single mutex.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    idle: chrono::Duration,
}

impl InMemorySessionStore {
    pub fn new(idle: std::time::Duration) -> Self {
        let idle = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::MAX);
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle,
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, SessionError> {
        self.sessions
            .lock()
            .map_err(|e| SessionError::Unavailable(format!("session lock poisoned: {}", e)))
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Result<Session, SessionError> {
        let sessions = self.lock()?;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.is_expired(self.idle, Utc::now()) {
            return Err(SessionError::Expired(id.to_string()));
        }
        Ok(session.clone())
    }

    fn put(&self, session: Session) -> Result<(), SessionError> {
        let mut sessions = self.lock()?;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.lock()?;
        Ok(sessions.remove(id).is_some())
    }

    fn sweep_expired(&self) -> usize {
        let Ok(mut sessions) = self.lock() else {
            return 0;
        };
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.idle, now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Swept expired sessions");
        }
        removed
    }

    fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn ping(&self) -> Result<(), SessionError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(Duration::from_secs(600))
    }

    fn stale(id: &str) -> Session {
        let mut session = Session::new(id);
        session.last_active_at = Utc::now() - chrono::Duration::hours(2);
        session
    }

    // ---- Basic operations ----

    #[test]
    fn test_put_then_get() {
        let store = store();
        store.put(Session::new("a")).unwrap();
        assert_eq!(store.get("a").unwrap().id, "a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        assert_eq!(
            store().get("nope").unwrap_err(),
            SessionError::NotFound("nope".into())
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = store();
        store.put(Session::new("a")).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.is_empty());
    }

    // ---- Expiry ----

    #[test]
    fn test_expired_session_reports_expired() {
        let store = store();
        store.put(stale("old")).unwrap();
        assert_eq!(
            store.get("old").unwrap_err(),
            SessionError::Expired("old".into())
        );
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = store();
        store.put(stale("old")).unwrap();
        store.put(Session::new("fresh")).unwrap();
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").is_ok());
        assert_eq!(store.sweep_expired(), 0);
    }

    // ---- Poisoning ----

    #[test]
    fn test_poisoned_lock_is_unavailable() {
        let store = Arc::new(store());
        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.sessions.lock().unwrap();
            panic!("poison the session lock");
        })
        .join();

        assert!(matches!(store.get("a"), Err(SessionError::Unavailable(_))));
        assert!(matches!(
            store.put(Session::new("a")),
            Err(SessionError::Unavailable(_))
        ));
        assert!(store.ping().is_err());
        assert_eq!(store.sweep_expired(), 0);
    }
}
