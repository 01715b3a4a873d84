//! Conversational layer for Vigil.
//!
//! Classifies monitoring questions, resolves follow-ups against session
//! context, fans queries out through the connector manager and renders
//! plain-text answers.

pub mod classifier;
pub mod context;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod types;

pub use classifier::IntentClassifier;
pub use engine::ConversationEngine;
pub use error::{ChatError, SessionError};
pub use pipeline::{TurnOutcome, TurnPipeline, TurnPlan};
pub use render::{assess_health, ResponseRenderer};
pub use session::{InMemorySessionStore, SessionStore};
pub use types::{
    ChatReply, HealthStatus, Intent, IntentCategory, Session, SessionSummary, Turn, TurnMetadata,
};
