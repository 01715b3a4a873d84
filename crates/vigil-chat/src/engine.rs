//! Conversation engine: owns sessions and runs turns through the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_connectors::ConnectorManager;
use vigil_core::config::{ChatConfig, QueryConfig};
use vigil_core::VigilConfig;

use crate::classifier::IntentClassifier;
use crate::context::extract_topics;
use crate::error::{ChatError, SessionError};
use crate::pipeline::TurnPipeline;
use crate::render::ResponseRenderer;
use crate::session::SessionStore;
use crate::types::{ChatReply, Session, SessionSummary, Turn, TurnMetadata};

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// Central coordinator: validates messages, serializes turns per session,
/// runs the turn pipeline and persists the result.
pub struct ConversationEngine {
    classifier: IntentClassifier,
    renderer: ResponseRenderer,
    manager: Arc<ConnectorManager>,
    store: Arc<dyn SessionStore>,
    chat: ChatConfig,
    query: QueryConfig,
    session_locks: Mutex<HashMap<String, SessionLock>>,
}

impl ConversationEngine {
    pub fn new(
        manager: Arc<ConnectorManager>,
        store: Arc<dyn SessionStore>,
        chat: ChatConfig,
        query: QueryConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(&chat.known_services),
            renderer: ResponseRenderer::default(),
            manager,
            store,
            chat,
            query,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &VigilConfig,
        manager: Arc<ConnectorManager>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::new(manager, store, config.chat.clone(), config.query.clone())
    }

    pub fn manager(&self) -> &Arc<ConnectorManager> {
        &self.manager
    }

    /// Reject empty and oversized messages. Length is counted in characters.
    pub fn validate(&self, message: &str) -> Result<(), ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > self.chat.max_message_length {
            return Err(ChatError::MessageTooLong(self.chat.max_message_length));
        }
        Ok(())
    }

    /// Answer one message, creating the session when `session_id` is absent,
    /// unknown or expired.
    ///
    /// Connector failures never surface here; they are reported in the reply
    /// metadata. A session store outage yields an answer with
    /// `metadata.persisted == false`.
    pub async fn handle_message(
        &self,
        message: &str,
        session_id: Option<String>,
    ) -> Result<ChatReply, ChatError> {
        self.validate(message)?;
        let session_id = session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let started = Instant::now();
        let turn_deadline = self.chat.turn_deadline();
        let lock = self.session_lock(&session_id);
        // A queued turn spends its own deadline waiting for the one ahead.
        let Ok(_turn) = tokio::time::timeout(turn_deadline, lock.lock()).await else {
            warn!(
                session_id = %session_id,
                waited_ms = started.elapsed().as_millis() as u64,
                "Session busy past the turn deadline"
            );
            return Ok(self.busy_reply(message.trim(), session_id, started));
        };

        let (mut session, store_available) = match self.store.get(&session_id) {
            Ok(session) => (session, true),
            Err(SessionError::NotFound(_)) => {
                debug!(session_id = %session_id, "Starting new session");
                (Session::new(&session_id), true)
            }
            Err(SessionError::Expired(_)) => {
                info!(session_id = %session_id, "Session expired, starting fresh");
                (Session::new(&session_id), true)
            }
            Err(e @ SessionError::Unavailable(_)) => {
                warn!(session_id = %session_id, error = %e, "Session store unavailable, turn will not be saved");
                (Session::new(&session_id), false)
            }
        };

        let pipeline = TurnPipeline::new(
            &self.classifier,
            &self.manager,
            &self.renderer,
            &self.query,
            turn_deadline.saturating_sub(started.elapsed()),
        );
        let utterance = message.trim();
        let outcome = pipeline.run(utterance, &session).await;

        let timestamp = Utc::now();
        let mut metadata = outcome.metadata;
        metadata.persisted = store_available;
        metadata.processing_time = started.elapsed().as_secs_f64();
        let turn = Turn {
            utterance: utterance.to_string(),
            intent: outcome.intent,
            response: outcome.response.clone(),
            metadata: metadata.clone(),
            timestamp,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        if store_available {
            session.record_turn(turn, self.chat.max_history);
            if let Err(e) = self.store.put(session) {
                warn!(session_id = %session_id, error = %e, "Failed to save session");
                metadata.persisted = false;
            }
        }

        info!(
            session_id = %session_id,
            intent = %metadata.intent,
            connectors_failed = metadata.connectors_failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat turn completed"
        );

        Ok(ChatReply {
            response: outcome.response,
            session_id,
            timestamp,
            metadata,
        })
    }

    /// Turns of a live session, oldest first. Empty for unknown or expired ids.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.store
            .get(session_id)
            .map(|s| s.history.into_iter().collect())
            .unwrap_or_default()
    }

    /// Delete a session. Clearing a missing session is not an error.
    ///
    /// Waits for a turn in flight on the same session, so the turn is saved
    /// first and then cleared along with the rest of the history. The lock
    /// entry stays in place for queued turns; `sweep_expired` prunes it.
    pub async fn clear_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let lock = self.session_lock(session_id);
        let _turn = lock.lock().await;
        let removed = self.store.remove(session_id)?;
        if removed {
            info!(session_id = %session_id, "Session cleared");
        }
        Ok(removed)
    }

    pub fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        let session = self.store.get(session_id).ok()?;
        let topics = extract_topics(session.history.iter().map(|t| t.utterance.as_str()));
        Some(SessionSummary {
            session_id: session.id,
            message_count: session.history.len(),
            start_time: session.created_at,
            last_activity: session.last_active_at,
            topics,
        })
    }

    /// Drop expired sessions and the turn locks nobody is holding.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.store.sweep_expired();
        self.locks().retain(|_, lock| Arc::strong_count(lock) > 1);
        removed
    }

    pub fn ping_store(&self) -> Result<(), SessionError> {
        self.store.ping()
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Answer for a turn that never got the session: classified, not
    /// queried, not saved.
    fn busy_reply(&self, utterance: &str, session_id: String, started: Instant) -> ChatReply {
        let intent = self.classifier.classify(utterance);
        let mut metadata = TurnMetadata::new(intent.category);
        metadata.entities = intent.entities;
        metadata.persisted = false;
        metadata.processing_time = started.elapsed().as_secs_f64();
        ChatReply {
            response: self.renderer.busy(),
            session_id,
            timestamp: Utc::now(),
            metadata,
        }
    }

    fn session_lock(&self, session_id: &str) -> SessionLock {
        Arc::clone(self.locks().entry(session_id.to_string()).or_default())
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionLock>> {
        // The map only holds lock handles; a panic mid-insert leaves it usable.
        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
