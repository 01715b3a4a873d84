//! Conversation data types.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_connectors::ConnectorFailure;
use vigil_core::QueryKind;

// =============================================================================
// Intent
// =============================================================================

/// Entity key for a target service name.
pub const ENTITY_SERVICE: &str = "service";
/// Entity key for a normalized metric name (`cpu`, `memory`, ...).
pub const ENTITY_METRIC: &str = "metric";
/// Entity key for a normalized window such as `15m` or `1h`.
pub const ENTITY_TIME_RANGE: &str = "time_range";
/// Entity key for an aggregation (`avg`, `sum`, `max`, `min`).
pub const ENTITY_AGGREGATION: &str = "aggregation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Health,
    MetricQuery,
    AlertQuery,
    ServiceQuery,
    Unknown,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Health => "health",
            IntentCategory::MetricQuery => "metric_query",
            IntentCategory::AlertQuery => "alert_query",
            IntentCategory::ServiceQuery => "service_query",
            IntentCategory::Unknown => "unknown",
        }
    }

    /// Query kinds needed to answer this category. Health needs both metrics
    /// and alerts; Unknown needs nothing.
    pub fn query_kinds(&self) -> &'static [QueryKind] {
        match self {
            IntentCategory::Health => &[QueryKind::Metrics, QueryKind::Alerts],
            IntentCategory::MetricQuery => &[QueryKind::Metrics],
            IntentCategory::AlertQuery => &[QueryKind::Alerts],
            IntentCategory::ServiceQuery => &[QueryKind::Services],
            IntentCategory::Unknown => &[],
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reading of one utterance.
///
/// Never mutated after classification; context resolution builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub category: IntentCategory,
    pub entities: BTreeMap<String, String>,
    pub raw_text: String,
}

const FOLLOW_UP_PREFIXES: &[&str] = &["what about", "how about", "and "];
const FOLLOW_UP_REFERENCES: &[&str] = &["it", "that", "same service", "that service", "this service"];

impl Intent {
    pub fn new(
        category: IntentCategory,
        entities: BTreeMap<String, String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            category,
            entities,
            raw_text: raw_text.into(),
        }
    }

    pub fn unknown(raw_text: impl Into<String>) -> Self {
        Self::new(IntentCategory::Unknown, BTreeMap::new(), raw_text)
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    /// Whether the utterance leans on an earlier turn ("what about memory",
    /// "is it down", "and the same service?").
    pub fn is_follow_up(&self) -> bool {
        let lower = self.raw_text.trim().to_lowercase();
        if FOLLOW_UP_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return true;
        }
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();
        FOLLOW_UP_REFERENCES.iter().any(|phrase| {
            let needle: Vec<&str> = phrase.split(' ').collect();
            words.windows(needle.len()).any(|w| w == needle.as_slice())
        })
    }
}

// =============================================================================
// Turns and sessions
// =============================================================================

/// Overall health verdict for a Health turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Structured block returned alongside every response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnMetadata {
    pub intent: IntentCategory,
    pub entities: BTreeMap<String, String>,
    /// Wall-clock seconds spent on the turn.
    pub processing_time: f64,
    pub connectors_queried: Vec<String>,
    pub connectors_answered: Vec<String>,
    pub connectors_failed: Vec<ConnectorFailure>,
    pub metrics_count: usize,
    pub alerts_count: usize,
    pub services_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    /// False when the session store was unavailable and the turn was not saved.
    pub persisted: bool,
}

impl TurnMetadata {
    pub fn new(intent: IntentCategory) -> Self {
        Self {
            intent,
            entities: BTreeMap::new(),
            processing_time: 0.0,
            connectors_queried: Vec::new(),
            connectors_answered: Vec::new(),
            connectors_failed: Vec::new(),
            metrics_count: 0,
            alerts_count: 0,
            services_count: 0,
            time_range: None,
            health_status: None,
            persisted: true,
        }
    }
}

/// One utterance and its answer. Appended to history, never edited.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub utterance: String,
    pub intent: Intent,
    pub response: String,
    pub metadata: TurnMetadata,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
}

/// A conversation and the context carried between its turns.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub history: VecDeque<Turn>,
    pub last_entities: BTreeMap<String, String>,
    pub last_category: Option<IntentCategory>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history: VecDeque::new(),
            last_entities: BTreeMap::new(),
            last_category: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn is_expired(&self, idle: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active_at > idle
    }

    /// Append a turn, fold its resolved entities into the carried context,
    /// and evict the oldest turns beyond `max_history`.
    pub fn record_turn(&mut self, turn: Turn, max_history: usize) {
        for (key, value) in &turn.intent.entities {
            self.last_entities.insert(key.clone(), value.clone());
        }
        if turn.intent.category != IntentCategory::Unknown {
            self.last_category = Some(turn.intent.category);
        }
        self.last_active_at = turn.timestamp;
        self.history.push_back(turn);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

// =============================================================================
// Engine output
// =============================================================================

/// What the engine hands back to the transport layer for one message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: TurnMetadata,
}

/// Activity overview for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub topics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(text: &str, category: IntentCategory, entities: &[(&str, &str)]) -> Turn {
        let entities: BTreeMap<String, String> = entities
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Turn {
            utterance: text.into(),
            intent: Intent::new(category, entities, text),
            response: "ok".into(),
            metadata: TurnMetadata::new(category),
            timestamp: Utc::now(),
            processing_time_ms: 1,
        }
    }

    #[test]
    fn test_health_expands_to_metrics_and_alerts() {
        assert_eq!(
            IntentCategory::Health.query_kinds(),
            &[QueryKind::Metrics, QueryKind::Alerts]
        );
        assert!(IntentCategory::Unknown.query_kinds().is_empty());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_value(IntentCategory::MetricQuery).unwrap();
        assert_eq!(json, "metric_query");
    }

    #[test]
    fn test_follow_up_prefixes() {
        assert!(Intent::unknown("What about memory?").is_follow_up());
        assert!(Intent::unknown("how about payments-service").is_follow_up());
        assert!(Intent::unknown("and the alerts?").is_follow_up());
    }

    #[test]
    fn test_follow_up_references() {
        assert!(Intent::unknown("is it still high?").is_follow_up());
        assert!(Intent::unknown("show errors for the same service").is_follow_up());
        assert!(!Intent::unknown("show cpu for checkout-service").is_follow_up());
        assert!(!Intent::unknown("items in the queue").is_follow_up());
    }

    #[test]
    fn test_record_turn_caps_history_fifo() {
        let mut session = Session::new("s1");
        for i in 0..5 {
            session.record_turn(turn(&format!("q{}", i), IntentCategory::Health, &[]), 3);
        }
        let utterances: Vec<&str> = session.history.iter().map(|t| t.utterance.as_str()).collect();
        assert_eq!(utterances, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_record_turn_merges_entities() {
        let mut session = Session::new("s1");
        session.record_turn(
            turn(
                "cpu for checkout-service",
                IntentCategory::MetricQuery,
                &[("service", "checkout-service"), ("metric", "cpu")],
            ),
            10,
        );
        session.record_turn(
            turn("memory", IntentCategory::MetricQuery, &[("metric", "memory")]),
            10,
        );
        assert_eq!(session.last_entities["service"], "checkout-service");
        assert_eq!(session.last_entities["metric"], "memory");
        assert_eq!(session.last_category, Some(IntentCategory::MetricQuery));
    }

    #[test]
    fn test_unknown_turn_keeps_last_category() {
        let mut session = Session::new("s1");
        session.record_turn(turn("alerts", IntentCategory::AlertQuery, &[]), 10);
        session.record_turn(turn("joke", IntentCategory::Unknown, &[]), 10);
        assert_eq!(session.last_category, Some(IntentCategory::AlertQuery));
    }

    #[test]
    fn test_session_expiry() {
        let mut session = Session::new("s1");
        let now = Utc::now();
        session.last_active_at = now - chrono::Duration::minutes(30);
        assert!(session.is_expired(chrono::Duration::minutes(10), now));
        assert!(!session.is_expired(chrono::Duration::minutes(60), now));
    }
}
