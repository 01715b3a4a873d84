//! Shared domain types for monitoring queries and their results.
//!
//! These types cross every crate boundary: the chat engine builds [`Query`]
//! values, connectors answer them with a [`ConnectorResult`], and the API
//! serializes the merged records straight to JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Label set attached to metrics and alerts. Ordered so output is stable.
pub type Labels = BTreeMap<String, String>;

// =============================================================================
// Query
// =============================================================================

/// The signal type a query asks a connector for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Metrics,
    Alerts,
    Services,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Metrics => "metrics",
            QueryKind::Alerts => "alerts",
            QueryKind::Services => "services",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation applied to metric series before they are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Avg,
    Sum,
    Max,
    Min,
}

impl Aggregation {
    /// Parse a normalized aggregation name (`avg`, `sum`, `max`, `min`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "avg" => Some(Aggregation::Avg),
            "sum" => Some(Aggregation::Sum),
            "max" => Some(Aggregation::Max),
            "min" => Some(Aggregation::Min),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Sum => "sum",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }
}

/// A normalized, backend-agnostic monitoring query.
///
/// Built fresh for every turn and never mutated once dispatched. The whole
/// value participates in the cache key, so two queries that differ in any
/// field are cached independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub kind: QueryKind,
    /// Services to restrict the query to. Empty means all services.
    pub target_services: BTreeSet<String>,
    pub metric_name: Option<String>,
    pub time_range: Duration,
    pub limit: usize,
    pub aggregation: Aggregation,
}

impl Query {
    /// Default look-back window when nothing else is specified.
    pub const DEFAULT_TIME_RANGE: Duration = Duration::from_secs(3600);
    /// Default result limit.
    pub const DEFAULT_LIMIT: usize = 100;

    /// Create a query of the given kind with default window and limit.
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            target_services: BTreeSet::new(),
            metric_name: None,
            time_range: Self::DEFAULT_TIME_RANGE,
            limit: Self::DEFAULT_LIMIT,
            aggregation: Aggregation::default(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.target_services.insert(service.into());
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric_name = Some(metric.into());
        self
    }

    pub fn with_time_range(mut self, time_range: Duration) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Whether `service` passes this query's service filter.
    pub fn targets(&self, service: &str) -> bool {
        self.target_services.is_empty()
            || self
                .target_services
                .iter()
                .any(|s| s.eq_ignore_ascii_case(service))
    }
}

// =============================================================================
// Records
// =============================================================================

/// A single metric sample as returned by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: Labels,
    pub unit: String,
    /// Name of the connector that produced this point. Set by the manager.
    #[serde(default)]
    pub source_connector: String,
}

impl MetricPoint {
    /// The service this point belongs to, read from the usual label keys.
    pub fn service(&self) -> Option<&str> {
        ["service", "job", "app", "resource"]
            .iter()
            .find_map(|k| self.labels.get(*k).map(String::as_str))
    }
}

/// Alert severity. Ordering is `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Map a backend's free-form severity string onto the three levels.
    ///
    /// Unknown strings become `Info` rather than failing.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "crit" | "error" | "page" | "sev0" | "sev1" | "high" => Severity::Critical,
            "warning" | "warn" | "sev2" | "medium" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active alert as reported by an alert manager or cloud monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub name: String,
    pub severity: Severity,
    pub description: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: Labels,
}

// =============================================================================
// ConnectorResult
// =============================================================================

/// Outcome of one connector answering one query.
///
/// Either a payload matching the query kind or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ConnectorResult {
    Metrics(Vec<MetricPoint>),
    Alerts(Vec<AlertRecord>),
    Services(Vec<String>),
    Error(ConnectorError),
}

impl ConnectorResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectorResult::Error(_))
    }

    pub fn error(&self) -> Option<&ConnectorError> {
        match self {
            ConnectorResult::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Number of records in the payload (0 for errors).
    pub fn len(&self) -> usize {
        match self {
            ConnectorResult::Metrics(m) => m.len(),
            ConnectorResult::Alerts(a) => a.len(),
            ConnectorResult::Services(s) => s.len(),
            ConnectorResult::Error(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty payload of the given kind.
    pub fn empty(kind: QueryKind) -> Self {
        match kind {
            QueryKind::Metrics => ConnectorResult::Metrics(Vec::new()),
            QueryKind::Alerts => ConnectorResult::Alerts(Vec::new()),
            QueryKind::Services => ConnectorResult::Services(Vec::new()),
        }
    }
}

impl From<ConnectorError> for ConnectorResult {
    fn from(err: ConnectorError) -> Self {
        ConnectorResult::Error(err)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorErrorKind;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(q: &Query) -> u64 {
        let mut h = DefaultHasher::new();
        q.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("error"), Severity::Critical);
        assert_eq!(Severity::parse_lenient(" warn "), Severity::Warning);
        assert_eq!(Severity::parse_lenient("Sev2"), Severity::Warning);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Info);
        assert_eq!(Severity::parse_lenient(""), Severity::Info);
    }

    #[test]
    fn test_query_defaults() {
        let q = Query::new(QueryKind::Metrics);
        assert!(q.target_services.is_empty());
        assert_eq!(q.time_range, Duration::from_secs(3600));
        assert_eq!(q.limit, 100);
        assert_eq!(q.aggregation, Aggregation::Avg);
    }

    #[test]
    fn test_query_equal_values_hash_equal() {
        let a = Query::new(QueryKind::Metrics)
            .with_service("checkout-service")
            .with_metric("cpu");
        let b = Query::new(QueryKind::Metrics)
            .with_metric("cpu")
            .with_service("checkout-service");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_query_differs_by_kind() {
        let a = Query::new(QueryKind::Metrics);
        let b = Query::new(QueryKind::Alerts);
        assert_ne!(a, b);
    }

    #[test]
    fn test_query_targets_all_when_empty() {
        let q = Query::new(QueryKind::Alerts);
        assert!(q.targets("anything"));
    }

    #[test]
    fn test_query_targets_case_insensitive() {
        let q = Query::new(QueryKind::Alerts).with_service("Checkout-Service");
        assert!(q.targets("checkout-service"));
        assert!(!q.targets("payments-service"));
    }

    #[test]
    fn test_aggregation_parse() {
        assert_eq!(Aggregation::parse("MAX"), Some(Aggregation::Max));
        assert_eq!(Aggregation::parse("median"), None);
    }

    #[test]
    fn test_metric_point_service_label_priority() {
        let mut labels = Labels::new();
        labels.insert("job".into(), "node".into());
        labels.insert("service".into(), "checkout-service".into());
        let p = MetricPoint {
            name: "cpu".into(),
            value: 1.0,
            timestamp: Utc::now(),
            labels,
            unit: "percent".into(),
            source_connector: String::new(),
        };
        assert_eq!(p.service(), Some("checkout-service"));
    }

    #[test]
    fn test_connector_result_error_has_no_payload() {
        let r = ConnectorResult::from(ConnectorError::new(
            ConnectorErrorKind::Timeout,
            "slow backend",
        ));
        assert!(r.is_error());
        assert_eq!(r.len(), 0);
        assert_eq!(r.error().map(|e| e.kind), Some(ConnectorErrorKind::Timeout));
    }

    #[test]
    fn test_connector_result_serializes_tagged() {
        let r = ConnectorResult::Services(vec!["api".into()]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "services");
        assert_eq!(json["data"][0], "api");
    }

    #[test]
    fn test_connector_result_empty_matches_kind() {
        assert!(matches!(
            ConnectorResult::empty(QueryKind::Alerts),
            ConnectorResult::Alerts(ref a) if a.is_empty()
        ));
    }
}
