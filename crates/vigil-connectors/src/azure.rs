//! Azure Monitor connector.
//!
//! Reads resources, Alerts Management alerts, and `Microsoft.Insights`
//! metrics for a single subscription. The bearer token comes from config.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};
use vigil_core::config::AzureMonitorConfig;
use vigil_core::{
    Aggregation, AlertRecord, ConnectorError, ConnectorResult, Labels, MetricPoint, Query,
    QueryKind, Severity, VigilError,
};

use crate::connector::MonitoringBackend;
use crate::http;

const NAME: &str = "azure_monitor";
const CAPABILITIES: &[QueryKind] = &[QueryKind::Metrics, QueryKind::Alerts, QueryKind::Services];
const MANAGEMENT_URL: &str = "https://management.azure.com";

const METRICS_API_VERSION: &str = "2018-01-01";
const ALERTS_API_VERSION: &str = "2019-05-05-preview";
const RESOURCES_API_VERSION: &str = "2021-04-01";
const SUBSCRIPTION_API_VERSION: &str = "2020-01-01";

/// Platform metrics commonly available on compute and web resources.
const COMMON_METRICS: &[&str] = &[
    "Percentage CPU",
    "Network In Total",
    "Network Out Total",
    "Disk Read Bytes",
    "Disk Write Bytes",
    "Available Memory Bytes",
    "Total Requests",
    "Response Time",
    "Failed Requests",
    "Successful Requests",
    "CPU Credits Consumed",
    "CPU Credits Remaining",
    "Data Disk IOPS Consumed Percentage",
    "OS Disk IOPS Consumed Percentage",
];

pub struct AzureMonitorConnector {
    base_url: String,
    subscription_id: String,
    bearer_token: String,
    resource_ids: Vec<String>,
    http: reqwest::Client,
}

impl AzureMonitorConnector {
    pub fn new(config: &AzureMonitorConfig, timeout: Duration) -> Result<Self, VigilError> {
        Self::with_base_url(config, timeout, MANAGEMENT_URL)
    }

    /// Point the connector at a different management endpoint (sovereign
    /// clouds, local fakes).
    pub fn with_base_url(
        config: &AzureMonitorConfig,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, VigilError> {
        if config.subscription_id.trim().is_empty() {
            return Err(VigilError::Config(
                "azure_monitor.subscription_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_id: config.subscription_id.clone(),
            bearer_token: config.bearer_token.clone(),
            resource_ids: config.resource_ids.clone(),
            http: http::build_client(timeout)?,
        })
    }

    fn get(&self, path: &str, api_version: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.bearer_token)
            .query(&[("api-version", api_version)])
    }

    fn subscription_path(&self) -> String {
        format!("/subscriptions/{}", self.subscription_id)
    }

    async fn resource_metrics(
        &self,
        resource_id: &str,
        query: &Query,
    ) -> Result<Vec<MetricPoint>, ConnectorError> {
        let end = Utc::now();
        let start = end - chrono::Duration::seconds(query.time_range.as_secs() as i64);
        let timespan = format!(
            "{}/{}",
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let request = self
            .get(
                &format!("{}/providers/Microsoft.Insights/metrics", resource_id),
                METRICS_API_VERSION,
            )
            .query(&[
                ("metricnames", metric_names_for(query.metric_name.as_deref())),
                ("timespan", timespan),
                ("interval", interval_for(query.time_range).to_string()),
                ("aggregation", aggregation_name(query.aggregation).to_string()),
            ]);
        let body: MetricsResponse = http::send_json(NAME, request).await?;
        Ok(parse_metrics(body, resource_id))
    }

    async fn fetch_metrics(&self, query: &Query) -> Result<Vec<MetricPoint>, ConnectorError> {
        let targets: Vec<&String> = self
            .resource_ids
            .iter()
            .filter(|id| query.targets(resource_name(id)))
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let outcomes = join_all(targets.iter().map(|id| self.resource_metrics(id, query))).await;

        let mut points = Vec::new();
        let mut first_error = None;
        let mut answered = 0usize;
        for (id, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(mut p) => {
                    answered += 1;
                    points.append(&mut p);
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "Azure metrics request failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(points),
        }
    }

    async fn fetch_alerts(&self, query: &Query) -> Result<Vec<AlertRecord>, ConnectorError> {
        let request = self
            .get(
                &format!(
                    "{}/providers/Microsoft.AlertsManagement/alerts",
                    self.subscription_path()
                ),
                ALERTS_API_VERSION,
            )
            .query(&[("alertState", "New,Acknowledged")]);
        let body: ListResponse<AzureAlert> = http::send_json(NAME, request).await?;
        Ok(parse_alerts(body)
            .into_iter()
            .filter(|a| query.targets(&a.service))
            .collect())
    }
}

#[async_trait]
impl MonitoringBackend for AzureMonitorConnector {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> &[QueryKind] {
        CAPABILITIES
    }

    async fn query(&self, query: &Query) -> ConnectorResult {
        let outcome = match query.kind {
            QueryKind::Metrics => self.fetch_metrics(query).await.map(ConnectorResult::Metrics),
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
        let request = self.get(
            &format!("{}/resources", self.subscription_path()),
            RESOURCES_API_VERSION,
        );
        let body: ListResponse<AzureResource> = http::send_json(NAME, request).await?;
        let names: BTreeSet<String> = body
            .value
            .into_iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| r.name)
            .collect();
        debug!(count = names.len(), "Listed Azure resources");
        Ok(names.into_iter().collect())
    }

    async fn list_metric_names(&self) -> Result<Vec<String>, ConnectorError> {
        Ok(COMMON_METRICS.iter().map(|m| m.to_string()).collect())
    }

    async fn health_check(&self) -> bool {
        http::probe(self.get(&self.subscription_path(), SUBSCRIPTION_API_VERSION)).await
    }
}

// =============================================================================
// Query translation
// =============================================================================

/// Azure metric names for a vocabulary metric. Unknown names pass through.
pub fn metric_names_for(metric: Option<&str>) -> String {
    match metric {
        None | Some("cpu") => "Percentage CPU".to_string(),
        Some("memory") => "Available Memory Bytes".to_string(),
        Some("disk") => "Disk Read Bytes,Disk Write Bytes".to_string(),
        Some("network") => "Network In Total,Network Out Total".to_string(),
        Some("latency") => "Response Time".to_string(),
        Some("throughput") => "Total Requests".to_string(),
        Some("errors") => "Failed Requests".to_string(),
        Some(raw) => raw.to_string(),
    }
}

pub fn aggregation_name(aggregation: Aggregation) -> &'static str {
    match aggregation {
        Aggregation::Avg => "Average",
        Aggregation::Sum => "Total",
        Aggregation::Max => "Maximum",
        Aggregation::Min => "Minimum",
    }
}

/// Pick a grain that keeps a window under a few hundred points.
pub fn interval_for(range: Duration) -> &'static str {
    match range.as_secs() {
        0..=7_200 => "PT1M",
        7_201..=21_600 => "PT5M",
        21_601..=86_400 => "PT15M",
        86_401..=259_200 => "PT1H",
        _ => "PT6H",
    }
}

/// Last path segment of an ARM resource id.
pub fn resource_name(resource_id: &str) -> &str {
    resource_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource_id)
}

pub fn convert_unit(unit: &str) -> &'static str {
    match unit {
        "Percent" => "percent",
        "Count" => "count",
        "Bytes" => "bytes",
        "Seconds" => "seconds",
        "BytesPerSecond" => "bytes_per_second",
        "CountPerSecond" => "per_second",
        "Milliseconds" => "milliseconds",
        _ => "unknown",
    }
}

// =============================================================================
// Response parsing
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct AzureResource {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub value: Vec<AzureMetric>,
}

#[derive(Debug, Deserialize)]
pub struct AzureMetric {
    pub name: LocalizedName,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
pub struct LocalizedName {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub metadatavalues: Vec<MetadataValue>,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataValue {
    pub name: LocalizedName,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub time_stamp: DateTime<Utc>,
    pub average: Option<f64>,
    pub maximum: Option<f64>,
    pub minimum: Option<f64>,
    pub total: Option<f64>,
}

impl DataPoint {
    fn value(&self) -> Option<f64> {
        self.average
            .or(self.maximum)
            .or(self.minimum)
            .or(self.total)
    }
}

/// Flatten a metrics response. Points with no aggregated value are skipped.
pub fn parse_metrics(body: MetricsResponse, resource_id: &str) -> Vec<MetricPoint> {
    let mut points = Vec::new();
    for metric in body.value {
        let unit = convert_unit(&metric.unit);
        for series in metric.timeseries {
            let mut labels: Labels = series
                .metadatavalues
                .into_iter()
                .filter(|m| !m.name.value.is_empty() && !m.value.is_empty())
                .map(|m| (m.name.value, m.value))
                .collect();
            labels.insert("resource".into(), resource_name(resource_id).to_string());
            labels.insert("resource_id".into(), resource_id.to_string());
            if let Some(kind) = resource_id.rsplit('/').nth(1) {
                labels.insert("resource_type".into(), kind.to_string());
            }
            for point in series.data {
                let Some(value) = point.value() else {
                    continue;
                };
                points.push(MetricPoint {
                    name: metric.name.value.clone(),
                    value,
                    timestamp: point.time_stamp,
                    labels: labels.clone(),
                    unit: unit.to_string(),
                    source_connector: String::new(),
                });
            }
        }
    }
    points
}

#[derive(Debug, Deserialize)]
pub struct AzureAlert {
    #[serde(default)]
    pub properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertProperties {
    #[serde(default)]
    pub essentials: AlertEssentials,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEssentials {
    pub alert_rule: Option<String>,
    pub severity: Option<String>,
    pub target_resource_name: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub monitor_condition: Option<String>,
    pub alert_state: Option<String>,
    pub target_resource_type: Option<String>,
}

/// Convert Alerts Management alerts. Azure severities `Sev0`..`Sev4` map
/// through [`Severity::parse_lenient`].
pub fn parse_alerts(body: ListResponse<AzureAlert>) -> Vec<AlertRecord> {
    body.value
        .into_iter()
        .map(|alert| {
            let e = alert.properties.essentials;
            let mut labels = Labels::new();
            for (key, value) in [
                ("monitor_condition", &e.monitor_condition),
                ("alert_state", &e.alert_state),
                ("target_resource_type", &e.target_resource_type),
                ("severity", &e.severity),
            ] {
                if let Some(v) = value {
                    labels.insert(key.to_string(), v.clone());
                }
            }
            let description = alert
                .properties
                .context
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            AlertRecord {
                name: e.alert_rule.unwrap_or_else(|| "Unknown".to_string()),
                severity: Severity::parse_lenient(e.severity.as_deref().unwrap_or("Sev3")),
                description,
                service: e
                    .target_resource_name
                    .unwrap_or_else(|| "unknown".to_string()),
                timestamp: e.start_date_time.unwrap_or_else(Utc::now),
                labels,
            }
        })
        .collect()
}
