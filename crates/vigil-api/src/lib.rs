//! Vigil API crate: axum HTTP server and route handlers.
//!
//! Exposes the conversation engine and the connector inventory as a JSON
//! API under `/api`, plus root `/health` and `/ready` checks.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
