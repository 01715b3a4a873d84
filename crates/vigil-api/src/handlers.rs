//! Route handler functions for all API endpoints.
//!
//! Handlers are thin: they validate the request shape, call the engine or
//! the connector manager, and shape the JSON response.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_chat::{ChatReply, SessionSummary, Turn};
use vigil_connectors::{CacheStats, ConnectorFailure, ConnectorSummary};
use vigil_core::{AlertRecord, Query, QueryKind};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsSummaryResponse {
    pub metrics_count: usize,
    pub services: Vec<String>,
    pub connectors: Vec<String>,
    pub connector_summaries: BTreeMap<String, ConnectorSummary>,
    pub cache: CacheStats,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertRecord>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
    pub connectors_failed: Vec<ConnectorFailure>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub services: BTreeMap<String, Vec<String>>,
    pub total_count: usize,
    /// Connectors whose inventory could not be read, with the reason.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: BTreeMap<String, String>,
    pub version: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Chat and sessions
// =============================================================================

/// POST /api/chat - answer one message.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let reply = state.engine.handle_message(&req.message, req.session_id).await?;
    Ok(Json(reply))
}

/// GET /api/sessions/{id}/history - turns of a session, oldest first.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<HistoryResponse> {
    let history = state.engine.history(&session_id);
    Json(HistoryResponse {
        session_id,
        history,
    })
}

/// DELETE /api/sessions/{id} - idempotent.
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.engine.clear_session(&session_id).await?;
    Ok(Json(MessageResponse {
        message: format!("Session {} cleared", session_id),
    }))
}

/// GET /api/sessions/{id}/summary
pub async fn session_summary(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    state
        .engine
        .session_summary(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session not found: {}", session_id)))
}

// =============================================================================
// Monitoring data
// =============================================================================

/// GET /api/metrics/summary - per-connector inventory of services and metrics.
pub async fn metrics_summary(State(state): State<AppState>) -> Json<MetricsSummaryResponse> {
    let summaries = state.manager.metrics_summaries().await;
    let services: BTreeSet<String> = summaries
        .values()
        .flat_map(|s| s.services.iter().cloned())
        .collect();
    Json(MetricsSummaryResponse {
        metrics_count: summaries.values().map(|s| s.metric_count).sum(),
        services: services.into_iter().collect(),
        connectors: state.manager.connector_names(),
        connector_summaries: summaries,
        cache: state.manager.cache().stats(),
        last_updated: Utc::now(),
    })
}

/// GET /api/alerts - active alerts from every connector, most severe first.
pub async fn alerts(State(state): State<AppState>) -> Json<AlertsResponse> {
    let query =
        Query::new(QueryKind::Alerts).with_limit(state.config.query.max_results);
    let merged = state.manager.execute(&query).await;
    Json(AlertsResponse {
        count: merged.alerts.len(),
        alerts: merged.alerts,
        timestamp: Utc::now(),
        connectors_failed: merged.connectors_failed,
    })
}

/// GET /api/services - service names grouped by connector.
pub async fn services(State(state): State<AppState>) -> Json<ServicesResponse> {
    let mut services = BTreeMap::new();
    let mut errors = BTreeMap::new();
    for (connector, result) in state.manager.services_by_connector().await {
        match result {
            Ok(list) => {
                services.insert(connector, list);
            }
            Err(e) => {
                errors.insert(connector.clone(), e.to_string());
                services.insert(connector, Vec::new());
            }
        }
    }
    Json(ServicesResponse {
        total_count: services.values().map(Vec::len).sum(),
        services,
        errors,
    })
}

// =============================================================================
// Health
// =============================================================================

/// GET /ready - the state is built and the router is serving.
///
/// Touches no backend; use `/health` for reachability.
pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /health - component reachability.
///
/// `unhealthy` when the session store or result cache is unreachable,
/// `degraded` when a connector fails its health check or none is configured.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut services = BTreeMap::new();
    let mut unhealthy = false;
    let mut degraded = false;

    match state.engine.ping_store() {
        Ok(()) => {
            services.insert("session_store".to_string(), "healthy".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Session store unreachable");
            services.insert("session_store".to_string(), "unhealthy".to_string());
            unhealthy = true;
        }
    }

    let cache = state.manager.cache();
    match cache.ping() {
        Ok(()) if cache.is_enabled() => {
            services.insert("result_cache".to_string(), "healthy".to_string());
        }
        Ok(()) => {
            services.insert("result_cache".to_string(), "disabled".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Result cache unreachable");
            services.insert("result_cache".to_string(), "unhealthy".to_string());
            unhealthy = true;
        }
    }

    let connectors = state.manager.health_check_all().await;
    if connectors.is_empty() {
        degraded = true;
    }
    for (name, ok) in connectors {
        if !ok {
            degraded = true;
        }
        let status = if ok { "healthy" } else { "unhealthy" };
        services.insert(format!("connector:{}", name), status.to_string());
    }

    let status = if unhealthy {
        "unhealthy"
    } else if degraded {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        services,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
