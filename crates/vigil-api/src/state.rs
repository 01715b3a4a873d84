//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use vigil_chat::ConversationEngine;
use vigil_connectors::ConnectorManager;
use vigil_core::VigilConfig;

/// Shared application state, cloned into every handler task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VigilConfig>,
    pub engine: Arc<ConversationEngine>,
    /// Same manager the engine dispatches through.
    pub manager: Arc<ConnectorManager>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: VigilConfig, engine: Arc<ConversationEngine>) -> Self {
        let manager = Arc::clone(engine.manager());
        Self {
            config: Arc::new(config),
            engine,
            manager,
            start_time: Instant::now(),
        }
    }
}
