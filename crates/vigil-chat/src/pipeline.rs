//! One conversational turn as an explicit sequence of stages.
//!
//! classify → resolve → plan → query → render. Every stage except `query`
//! is a pure function of its inputs; persisting the turn is left to the
//! engine, which owns the session.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::debug;
use vigil_connectors::{ConnectorManager, MergedResult};
use vigil_core::config::{format_duration, parse_duration, QueryConfig};
use vigil_core::{Aggregation, Query, QueryKind};

use crate::classifier::IntentClassifier;
use crate::context;
use crate::render::{collect_failures, ResponseRenderer};
use crate::types::{
    Intent, IntentCategory, Session, TurnMetadata, ENTITY_AGGREGATION, ENTITY_METRIC, ENTITY_SERVICE,
    ENTITY_TIME_RANGE,
};

/// Queries planned for one resolved intent.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPlan {
    pub intent: Intent,
    pub queries: Vec<Query>,
    /// Window every query covers, already clamped.
    pub time_range: Duration,
}

/// What a turn produced, ready to be persisted.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub intent: Intent,
    pub response: String,
    pub metadata: TurnMetadata,
}

pub struct TurnPipeline<'a> {
    classifier: &'a IntentClassifier,
    manager: &'a ConnectorManager,
    renderer: &'a ResponseRenderer,
    query_config: &'a QueryConfig,
    turn_deadline: Duration,
}

impl<'a> TurnPipeline<'a> {
    pub fn new(
        classifier: &'a IntentClassifier,
        manager: &'a ConnectorManager,
        renderer: &'a ResponseRenderer,
        query_config: &'a QueryConfig,
        turn_deadline: Duration,
    ) -> Self {
        Self {
            classifier,
            manager,
            renderer,
            query_config,
            turn_deadline,
        }
    }

    /// Run every stage for `text` against the session's carried context.
    pub async fn run(&self, text: &str, session: &Session) -> TurnOutcome {
        let started = Instant::now();

        let intent = self.resolve(&self.classify(text), session);
        let plan = self.plan(&intent);
        let remaining = self.turn_deadline.saturating_sub(started.elapsed());
        let results = self.query(&plan, remaining).await;
        let (response, mut metadata) = self.render(&plan, &results);
        metadata.processing_time = started.elapsed().as_secs_f64();

        debug!(
            category = %plan.intent.category,
            queries = plan.queries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn pipeline finished"
        );

        TurnOutcome {
            intent: plan.intent,
            response,
            metadata,
        }
    }

    pub fn classify(&self, text: &str) -> Intent {
        self.classifier.classify(text)
    }

    pub fn resolve(&self, intent: &Intent, session: &Session) -> Intent {
        context::resolve(intent, session)
    }

    /// Build the queries for a resolved intent. `Unknown` plans nothing.
    pub fn plan(&self, intent: &Intent) -> TurnPlan {
        let requested = intent
            .entity(ENTITY_TIME_RANGE)
            .and_then(parse_duration)
            .unwrap_or_else(|| self.query_config.default_duration());
        let time_range = self.query_config.clamp(requested);
        let aggregation = intent
            .entity(ENTITY_AGGREGATION)
            .and_then(Aggregation::parse)
            .unwrap_or_default();

        let queries = intent
            .category
            .query_kinds()
            .iter()
            .map(|&kind| {
                let mut query = Query::new(kind)
                    .with_time_range(time_range)
                    .with_limit(self.query_config.max_results)
                    .with_aggregation(aggregation);
                if let Some(service) = intent.entity(ENTITY_SERVICE) {
                    query = query.with_service(service);
                }
                // Health asks for liveness, never a specific metric.
                if kind == QueryKind::Metrics && intent.category == IntentCategory::MetricQuery {
                    if let Some(metric) = intent.entity(ENTITY_METRIC) {
                        query = query.with_metric(metric);
                    }
                }
                query
            })
            .collect();

        TurnPlan {
            intent: intent.clone(),
            queries,
            time_range,
        }
    }

    /// Fan every planned query out concurrently, bounded by `deadline`.
    pub async fn query(&self, plan: &TurnPlan, deadline: Duration) -> Vec<MergedResult> {
        if plan.queries.is_empty() {
            return Vec::new();
        }
        let deadline = deadline.min(self.manager.fanout_deadline());
        join_all(
            plan.queries
                .iter()
                .map(|q| self.manager.execute_within(q, deadline)),
        )
        .await
    }

    /// Render the answer and the structured metadata block.
    pub fn render(&self, plan: &TurnPlan, results: &[MergedResult]) -> (String, TurnMetadata) {
        let time_range = format_duration(plan.time_range);
        let rendered = self.renderer.render(&plan.intent, results, &time_range);

        let mut metadata = TurnMetadata::new(plan.intent.category);
        metadata.entities = plan.intent.entities.clone();
        metadata.health_status = rendered.health_status;
        if !plan.queries.is_empty() {
            metadata.time_range = Some(time_range);
        }
        for result in results {
            for name in &result.connectors_queried {
                if !metadata.connectors_queried.contains(name) {
                    metadata.connectors_queried.push(name.clone());
                }
            }
            for name in &result.connectors_answered {
                if !metadata.connectors_answered.contains(name) {
                    metadata.connectors_answered.push(name.clone());
                }
            }
            metadata.metrics_count += result.metrics.len();
            metadata.alerts_count += result.alerts.len();
            metadata.services_count += result.services.len();
        }
        metadata.connectors_failed = collect_failures(results);

        (rendered.text, metadata)
    }
}
