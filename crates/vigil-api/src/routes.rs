//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vigil_core::config::ServerConfig;
use vigil_core::VigilError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Build the CORS layer from `server.cors_origins` (`*` or a comma list).
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if server.cors_origins.split(',').any(|o| o.trim() == "*") || origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let limiter = RateLimiter::new(server.rate_limit_per_sec);

    let api_routes = Router::new()
        .route("/chat", post(handlers::chat))
        .route("/sessions/{id}", delete(handlers::clear_session))
        .route("/sessions/{id}/history", get(handlers::session_history))
        .route("/sessions/{id}/summary", get(handlers::session_summary))
        .route("/metrics/summary", get(handlers::metrics_summary))
        .route("/alerts", get(handlers::alerts))
        .route("/services", get(handlers::services))
        .layer(
            ServiceBuilder::new()
                .layer(axum::Extension(limiter))
                .layer(axum::middleware::from_fn(rate_limit_middleware)),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(server))
        .with_state(state)
}

/// Bind to `server.host:server.port` and serve until the process stops.
pub async fn start_server(state: AppState) -> Result<(), VigilError> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VigilError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| VigilError::Api(format!("Server error: {}", e)))
}
