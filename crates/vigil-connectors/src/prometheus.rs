//! Prometheus and Alertmanager connector.
//!
//! Translates the abstract [`Query`] into PromQL, reads metrics through the
//! HTTP query API, and reads alerts from Alertmanager with a fallback to the
//! `ALERTS` series when Alertmanager is unreachable.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use vigil_core::config::PrometheusConfig;
use vigil_core::{
    AlertRecord, ConnectorError, ConnectorErrorKind, ConnectorResult, Labels, MetricPoint, Query,
    QueryKind, Severity, VigilError,
};

use crate::connector::MonitoringBackend;
use crate::http;

const NAME: &str = "prometheus";
const CAPABILITIES: &[QueryKind] = &[QueryKind::Metrics, QueryKind::Alerts, QueryKind::Services];

/// Range queries aim for roughly this many samples per series.
const TARGET_SAMPLES: u64 = 60;
const MIN_STEP_SECS: u64 = 15;

pub struct PrometheusConnector {
    base_url: String,
    alertmanager_url: String,
    username: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

impl PrometheusConnector {
    pub fn new(config: &PrometheusConfig, timeout: Duration) -> Result<Self, VigilError> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(VigilError::Config(
                "prometheus url must not be empty".to_string(),
            ));
        }
        let alertmanager_url = config
            .alertmanager_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| default_alertmanager_url(&base_url));
        Ok(Self {
            base_url,
            alertmanager_url,
            username: config.username.clone(),
            password: config.password.clone(),
            http: http::build_client(timeout)?,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn instant_query(
        &self,
        promql: &str,
        fallback_name: &str,
    ) -> Result<Vec<MetricPoint>, ConnectorError> {
        let url = format!("{}/api/v1/query", self.base_url);
        debug!(promql = %promql, "Prometheus instant query");
        let body: ApiResponse<QueryData> =
            http::send_json(NAME, self.get(&url).query(&[("query", promql)])).await?;
        parse_query_response(body, fallback_name)
    }

    async fn range_query(
        &self,
        promql: &str,
        range: Duration,
        fallback_name: &str,
    ) -> Result<Vec<MetricPoint>, ConnectorError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let end = Utc::now();
        let start = end - chrono::Duration::seconds(range.as_secs() as i64);
        let step = step_for(range);
        debug!(promql = %promql, step_secs = step, "Prometheus range query");
        let params = [
            ("query", promql.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", format!("{}s", step)),
        ];
        let body: ApiResponse<QueryData> =
            http::send_json(NAME, self.get(&url).query(&params)).await?;
        parse_query_response(body, fallback_name)
    }

    async fn fetch_alerts(&self, query: &Query) -> Result<Vec<AlertRecord>, ConnectorError> {
        let url = format!("{}/api/v2/alerts", self.alertmanager_url);
        let request = self
            .get(&url)
            .query(&[("active", "true"), ("silenced", "false")]);
        let alerts = match http::send_json::<Vec<AlertmanagerAlert>>(NAME, request).await {
            Ok(raw) => parse_alertmanager_alerts(raw),
            Err(e) if e.kind == ConnectorErrorKind::Auth => return Err(e),
            Err(e) => {
                warn!(error = %e, "Alertmanager unavailable, falling back to ALERTS series");
                let series = self
                    .instant_query(r#"ALERTS{alertstate="firing"}"#, "ALERTS")
                    .await?;
                alerts_from_series(series)
            }
        };
        Ok(alerts
            .into_iter()
            .filter(|a| query.targets(&a.service))
            .collect())
    }
}

#[async_trait]
impl MonitoringBackend for PrometheusConnector {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> &[QueryKind] {
        CAPABILITIES
    }

    async fn query(&self, query: &Query) -> ConnectorResult {
        let outcome = match query.kind {
            QueryKind::Metrics => {
                let promql = build_promql(query);
                let fallback = query.metric_name.as_deref().unwrap_or("up");
                // `up` is a point-in-time reading; everything else is charted.
                let points = if query.metric_name.is_none() {
                    self.instant_query(&promql, fallback).await
                } else {
                    self.range_query(&promql, query.time_range, fallback).await
                };
                points.map(ConnectorResult::Metrics)
            }
            QueryKind::Alerts => self.fetch_alerts(query).await.map(ConnectorResult::Alerts),
            QueryKind::Services => self.list_services().await.map(|services| {
                ConnectorResult::Services(
                    services.into_iter().filter(|s| query.targets(s)).collect(),
                )
            }),
        };
        outcome.unwrap_or_else(ConnectorResult::Error)
    }

    async fn list_services(&self) -> Result<Vec<String>, ConnectorError> {
        let series = self.instant_query("group by (job) (up)", "up").await?;
        let jobs: BTreeSet<String> = series
            .into_iter()
            .filter_map(|p| p.labels.get("job").cloned())
            .collect();
        Ok(jobs.into_iter().collect())
    }

    async fn list_metric_names(&self) -> Result<Vec<String>, ConnectorError> {
        let url = format!("{}/api/v1/label/__name__/values", self.base_url);
        let body: ApiResponse<Vec<String>> = http::send_json(NAME, self.get(&url)).await?;
        body.into_data()
    }

    async fn health_check(&self) -> bool {
        http::probe(self.get(&format!("{}/-/healthy", self.base_url))).await
    }
}

// =============================================================================
// PromQL generation
// =============================================================================

/// Alertmanager listens on 9093 next to Prometheus on 9090 by convention.
pub fn default_alertmanager_url(prometheus_url: &str) -> String {
    prometheus_url.replace(":9090", ":9093")
}

/// Label selector restricting a series to the query's target services.
fn selector(metric: &str, extra: &[&str], query: &Query) -> String {
    let mut matchers: Vec<String> = extra.iter().map(|m| m.to_string()).collect();
    if !query.target_services.is_empty() {
        let alternatives: Vec<String> = query
            .target_services
            .iter()
            .map(|s| regex::escape(s).replace('\\', "\\\\"))
            .collect();
        matchers.push(format!("job=~\"{}\"", alternatives.join("|")));
    }
    if matchers.is_empty() {
        metric.to_string()
    } else {
        format!("{}{{{}}}", metric, matchers.join(","))
    }
}

/// Build the PromQL expression for a metrics query.
///
/// Vocabulary metrics map to conventional exporter series; anything else is
/// treated as a raw series name. No metric means target liveness (`up`).
pub fn build_promql(query: &Query) -> String {
    let Some(metric) = query.metric_name.as_deref() else {
        return selector("up", &[], query);
    };
    let expr = match metric {
        "cpu" => format!(
            "rate({}[5m]) * 100",
            selector("process_cpu_seconds_total", &[], query)
        ),
        "memory" => selector("process_resident_memory_bytes", &[], query),
        "disk" => format!(
            "rate({}[5m])",
            selector("node_disk_io_time_seconds_total", &[], query)
        ),
        "network" => format!(
            "rate({}[5m])",
            selector("node_network_receive_bytes_total", &[], query)
        ),
        "latency" => format!(
            "rate({}[5m]) / rate({}[5m])",
            selector("http_request_duration_seconds_sum", &[], query),
            selector("http_request_duration_seconds_count", &[], query)
        ),
        "throughput" => format!(
            "rate({}[5m])",
            selector("http_requests_total", &[], query)
        ),
        "errors" => format!(
            "rate({}[5m])",
            selector("http_requests_total", &[r#"status=~"5..""#], query)
        ),
        raw => selector(raw, &[], query),
    };
    format!("{} by (job) ({})", query.aggregation.as_str(), expr)
}

fn step_for(range: Duration) -> u64 {
    (range.as_secs() / TARGET_SAMPLES).max(MIN_STEP_SECS)
}

/// Guess a unit from a series name.
pub fn infer_unit(metric_name: &str) -> &'static str {
    let lower = metric_name.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if has(&["bytes", "size", "memory"]) {
        "bytes"
    } else if has(&["duration", "time", "latency"]) {
        "seconds"
    } else if has(&["rate", "rps", "qps"]) {
        "per_second"
    } else if has(&["percent", "ratio", "cpu"]) {
        "percent"
    } else if has(&["count", "total", "num"]) {
        "count"
    } else {
        "unknown"
    }
}

// =============================================================================
// Response parsing
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<T, ConnectorError> {
        if self.status != "success" {
            return Err(ConnectorError::malformed(format!(
                "prometheus reported {}: {}",
                self.status,
                self.error.unwrap_or_default()
            )));
        }
        self.data
            .ok_or_else(|| ConnectorError::malformed("prometheus response has no data"))
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: Labels,
    pub value: Option<(f64, String)>,
    pub values: Option<Vec<(f64, String)>>,
}

/// Flatten an instant or range query response into metric points.
///
/// Samples that are not finite numbers are skipped. Series without a
/// `__name__` label (aggregations drop it) take `fallback_name`.
pub fn parse_query_response(
    body: ApiResponse<QueryData>,
    fallback_name: &str,
) -> Result<Vec<MetricPoint>, ConnectorError> {
    let data = body.into_data()?;
    let mut points = Vec::new();
    for series in data.result {
        let mut labels = series.metric;
        let name = labels
            .remove("__name__")
            .unwrap_or_else(|| fallback_name.to_string());
        let unit = infer_unit(&name);
        let samples = series
            .value
            .into_iter()
            .chain(series.values.unwrap_or_default());
        for (ts, raw) in samples {
            let Ok(value) = raw.parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis((ts * 1000.0) as i64) else {
                continue;
            };
            points.push(MetricPoint {
                name: name.clone(),
                value,
                timestamp,
                labels: labels.clone(),
                unit: unit.to_string(),
                source_connector: String::new(),
            });
        }
    }
    debug!(result_type = %data.result_type, points = points.len(), "Parsed Prometheus response");
    Ok(points)
}

#[derive(Debug, Deserialize)]
pub struct AlertmanagerAlert {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<DateTime<Utc>>,
    pub status: Option<AlertmanagerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AlertmanagerStatus {
    pub state: String,
}

/// Convert Alertmanager v2 alerts, keeping only active ones.
pub fn parse_alertmanager_alerts(raw: Vec<AlertmanagerAlert>) -> Vec<AlertRecord> {
    raw.into_iter()
        .filter(|a| a.status.as_ref().map_or(true, |s| s.state == "active"))
        .map(|a| {
            let description = a
                .annotations
                .get("description")
                .or_else(|| a.annotations.get("summary"))
                .cloned()
                .unwrap_or_default();
            alert_from_labels(a.labels, description, a.starts_at.unwrap_or_else(Utc::now))
        })
        .collect()
}

/// Convert `ALERTS{alertstate="firing"}` samples into alerts.
pub fn alerts_from_series(series: Vec<MetricPoint>) -> Vec<AlertRecord> {
    series
        .into_iter()
        .map(|p| {
            let description = p.labels.get("description").cloned().unwrap_or_default();
            alert_from_labels(p.labels, description, p.timestamp)
        })
        .collect()
}

fn alert_from_labels(labels: Labels, description: String, timestamp: DateTime<Utc>) -> AlertRecord {
    AlertRecord {
        name: labels
            .get("alertname")
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        severity: labels
            .get("severity")
            .map(|s| Severity::parse_lenient(s))
            .unwrap_or(Severity::Warning),
        description,
        service: labels
            .get("service")
            .or_else(|| labels.get("job"))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
        timestamp,
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Aggregation;

    fn parse<T: serde::de::DeserializeOwned>(json: &str) -> T {
        serde_json::from_str(json).unwrap()
    }

    // ---- PromQL ----

    #[test]
    fn test_promql_health_is_up() {
        assert_eq!(build_promql(&Query::new(QueryKind::Metrics)), "up");
    }

    #[test]
    fn test_promql_up_with_service_filter() {
        let q = Query::new(QueryKind::Metrics).with_service("api");
        assert_eq!(build_promql(&q), r#"up{job=~"api"}"#);
    }

    #[test]
    fn test_promql_cpu_with_services_and_aggregation() {
        let q = Query::new(QueryKind::Metrics)
            .with_metric("cpu")
            .with_service("checkout-service")
            .with_service("payments-service")
            .with_aggregation(Aggregation::Max);
        assert_eq!(
            build_promql(&q),
            r#"max by (job) (rate(process_cpu_seconds_total{job=~"checkout\\-service|payments\\-service"}[5m]) * 100)"#
        );
    }

    #[test]
    fn test_promql_errors_keeps_status_matcher() {
        let q = Query::new(QueryKind::Metrics).with_metric("errors");
        assert_eq!(
            build_promql(&q),
            r#"avg by (job) (rate(http_requests_total{status=~"5.."}[5m]))"#
        );
    }

    #[test]
    fn test_promql_raw_metric_name() {
        let q = Query::new(QueryKind::Metrics)
            .with_metric("queue_depth")
            .with_aggregation(Aggregation::Sum);
        assert_eq!(build_promql(&q), "sum by (job) (queue_depth)");
    }

    #[test]
    fn test_default_alertmanager_url() {
        assert_eq!(
            default_alertmanager_url("http://prom:9090"),
            "http://prom:9093"
        );
        assert_eq!(
            default_alertmanager_url("https://prom.example.com"),
            "https://prom.example.com"
        );
    }

    #[test]
    fn test_step_has_floor() {
        assert_eq!(step_for(Duration::from_secs(60)), 15);
        assert_eq!(step_for(Duration::from_secs(3600)), 60);
    }

    // ---- Units ----

    #[test]
    fn test_infer_unit() {
        assert_eq!(infer_unit("process_resident_memory_bytes"), "bytes");
        assert_eq!(infer_unit("http_request_duration_seconds"), "seconds");
        assert_eq!(infer_unit("requests_rps"), "per_second");
        assert_eq!(infer_unit("cpu"), "percent");
        assert_eq!(infer_unit("jobs_count"), "count");
        assert_eq!(infer_unit("up"), "unknown");
    }

    // ---- Parsing ----

    #[test]
    fn test_parse_instant_vector() {
        let body = parse(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"__name__":"up","job":"api","instance":"a:80"},"value":[1700000000.5,"1"]},
                {"metric":{"__name__":"up","job":"db"},"value":[1700000000,"0"]}
            ]}}"#,
        );
        let points = parse_query_response(body, "fallback").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "up");
        assert_eq!(points[0].service(), Some("api"));
        assert!(!points[0].labels.contains_key("__name__"));
        assert_eq!(points[1].value, 0.0);
        assert_eq!(points[0].timestamp.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn test_parse_matrix_uses_fallback_name_and_skips_nan() {
        let body = parse(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"job":"api"},"values":[[1700000000,"0.5"],[1700000015,"NaN"],[1700000030,"0.7"]]}
            ]}}"#,
        );
        let points = parse_query_response(body, "cpu").unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.name == "cpu"));
        assert_eq!(points[1].value, 0.7);
    }

    #[test]
    fn test_parse_error_status_is_malformed() {
        let body = parse(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#);
        let err = parse_query_response(body, "x").unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::Malformed);
        assert!(err.message.contains("parse error"));
    }

    #[test]
    fn test_parse_alertmanager_alerts() {
        let raw: Vec<AlertmanagerAlert> = parse(
            r#"[
                {"labels":{"alertname":"HighCPU","severity":"critical","job":"checkout-service"},
                 "annotations":{"summary":"CPU above 90%"},
                 "startsAt":"2024-05-01T10:00:00Z","status":{"state":"active"}},
                {"labels":{"alertname":"Silenced"},"annotations":{},
                 "startsAt":"2024-05-01T10:00:00Z","status":{"state":"suppressed"}}
            ]"#,
        );
        let alerts = parse_alertmanager_alerts(raw);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "HighCPU");
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].service, "checkout-service");
        assert_eq!(alerts[0].description, "CPU above 90%");
    }

    #[test]
    fn test_alerts_from_series_defaults() {
        let mut labels = Labels::new();
        labels.insert("alertname".into(), "TargetDown".into());
        let point = MetricPoint {
            name: "ALERTS".into(),
            value: 1.0,
            timestamp: Utc::now(),
            labels,
            unit: "unknown".into(),
            source_connector: String::new(),
        };
        let alerts = alerts_from_series(vec![point]);
        assert_eq!(alerts[0].name, "TargetDown");
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].service, "unknown");
    }

    #[test]
    fn test_new_rejects_empty_url() {
        let config = PrometheusConfig::default();
        assert!(PrometheusConnector::new(&config, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_error() {
        let config = PrometheusConfig {
            url: "http://127.0.0.1:1".into(),
            ..PrometheusConfig::default()
        };
        let connector = PrometheusConnector::new(&config, Duration::from_secs(2)).unwrap();
        assert!(!connector.health_check().await);
        let result = connector.query(&Query::new(QueryKind::Metrics)).await;
        let err = result.error().unwrap();
        assert!(matches!(
            err.kind,
            ConnectorErrorKind::Unavailable | ConnectorErrorKind::Timeout
        ));
    }
}
