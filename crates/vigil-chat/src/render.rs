//! Response rendering.
//!
//! Turns merged connector results into a plain-text answer. Values only ever
//! come from connector payloads; when nothing answered the text says so.

use std::collections::BTreeMap;

use vigil_connectors::{ConnectorFailure, MergedResult};
use vigil_core::{AlertRecord, MetricPoint, QueryKind, Severity};

use crate::types::{HealthStatus, Intent, IntentCategory, ENTITY_METRIC, ENTITY_SERVICE};

/// Metric series that report target liveness (1 = up, 0 = down).
const UP_METRIC: &str = "up";

/// Text plus the health verdict when the turn asked for one.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub health_status: Option<HealthStatus>,
}

impl Rendered {
    fn text(text: String) -> Self {
        Self {
            text,
            health_status: None,
        }
    }
}

// =============================================================================
// ResponseRenderer
// =============================================================================

pub struct ResponseRenderer {
    /// Maximum number of list entries (series, alerts, services) spelled out.
    pub max_items: usize,
}

impl Default for ResponseRenderer {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ResponseRenderer {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
        }
    }

    /// Render the answer for a resolved intent.
    ///
    /// `results` holds one merged result per planned query; it is empty only
    /// for `Unknown` intents. `time_range` is the window the queries covered.
    pub fn render(&self, intent: &Intent, results: &[MergedResult], time_range: &str) -> Rendered {
        if intent.category == IntentCategory::Unknown || results.is_empty() {
            return Rendered::text(self.guidance());
        }
        if results.iter().all(MergedResult::is_total_failure) {
            return Rendered::text(self.no_sources(results));
        }

        let answered = |kind: QueryKind| {
            results
                .iter()
                .find(|r| r.kind == kind && !r.is_total_failure())
        };

        let mut rendered = match intent.category {
            IntentCategory::MetricQuery => match answered(QueryKind::Metrics) {
                Some(r) if !r.metrics.is_empty() => {
                    Rendered::text(self.metrics_answer(intent, &r.metrics, time_range))
                }
                _ => Rendered::text(self.no_data(intent)),
            },
            IntentCategory::AlertQuery => match answered(QueryKind::Alerts) {
                Some(r) => Rendered::text(self.alerts_answer(intent, &r.alerts)),
                None => Rendered::text(self.no_data(intent)),
            },
            IntentCategory::ServiceQuery => match answered(QueryKind::Services) {
                Some(r) => Rendered::text(self.services_answer(&r.services, r.connectors_answered.len())),
                None => Rendered::text(self.no_data(intent)),
            },
            IntentCategory::Health => self.health_answer(
                intent,
                answered(QueryKind::Metrics).map(|r| r.metrics.as_slice()),
                answered(QueryKind::Alerts).map(|r| r.alerts.as_slice()),
            ),
            IntentCategory::Unknown => Rendered::text(self.guidance()),
        };

        let failures = collect_failures(results);
        if !failures.is_empty() {
            rendered.text.push_str(&format!(
                "\n\nNote: some data sources did not respond: {}.",
                describe_failures(&failures)
            ));
        }
        rendered
    }

    // -----------------------------------------------------------------
    // Fixed texts
    // -----------------------------------------------------------------

    pub fn guidance(&self) -> String {
        [
            "I can answer questions about your monitoring data. Try asking:",
            "- \"Is the system healthy?\"",
            "- \"Show CPU for checkout-service over the last hour\"",
            "- \"What alerts are firing?\"",
            "- \"Which services are running?\"",
        ]
        .join("\n")
    }

    /// The session was still answering an earlier message when the turn
    /// deadline ran out.
    pub fn busy(&self) -> String {
        "I'm still working on your previous question in this conversation and couldn't \
         get to this one in time. Please ask again in a moment."
            .to_string()
    }

    /// Every query for the turn failed or had no connector to go to.
    pub fn no_sources(&self, results: &[MergedResult]) -> String {
        let mut text = String::from(
            "No data sources are reachable right now, so I can't answer that without guessing.",
        );
        let failures = collect_failures(results);
        if failures.is_empty() {
            text.push_str(" No connectors are configured for this kind of question.");
        } else {
            text.push_str(&format!("\n\nUnreachable: {}.", describe_failures(&failures)));
        }
        text
    }

    pub fn no_data(&self, intent: &Intent) -> String {
        let mut suggestions = Vec::new();
        if let Some(service) = intent.entity(ENTITY_SERVICE) {
            suggestions.push(format!("Check that the service '{}' is running", service));
        }
        if let Some(metric) = intent.entity(ENTITY_METRIC) {
            suggestions.push(format!("Verify that '{}' metrics are being collected", metric));
        }

        let base = format!("No data found for your query: '{}'", intent.raw_text.trim());
        if suggestions.is_empty() {
            format!(
                "{}\n\nTry asking about available services or check system health.",
                base
            )
        } else {
            let lines: Vec<String> = suggestions.iter().map(|s| format!("- {}", s)).collect();
            format!("{}\n\nSuggestions:\n{}", base, lines.join("\n"))
        }
    }

    // -----------------------------------------------------------------
    // Per-category answers
    // -----------------------------------------------------------------

    fn metrics_answer(&self, intent: &Intent, metrics: &[MetricPoint], time_range: &str) -> String {
        let mut series: BTreeMap<(String, String), Vec<&MetricPoint>> = BTreeMap::new();
        for point in metrics {
            let service = point
                .service()
                .unwrap_or(point.source_connector.as_str())
                .to_string();
            series
                .entry((point.name.clone(), service))
                .or_default()
                .push(point);
        }

        let subject = intent.entity(ENTITY_METRIC).unwrap_or("metrics");
        let scope = intent
            .entity(ENTITY_SERVICE)
            .map(|s| format!(" for {}", s))
            .unwrap_or_default();
        let mut lines = vec![format!(
            "Here's {}{} over the last {} ({} series):",
            subject,
            scope,
            time_range,
            series.len()
        )];
        lines.push(String::new());

        for ((name, service), points) in series.iter().take(self.max_items) {
            let stats = SeriesStats::from_points(points);
            let unit = points.first().map(|p| p.unit.as_str()).unwrap_or("");
            let sources = points
                .first()
                .map(|p| p.source_connector.as_str())
                .unwrap_or("");
            lines.push(format!(
                "- {} ({}, {}): latest {}, avg {}, max {} across {} samples",
                name,
                service,
                sources,
                format_value(stats.latest, unit),
                format_value(stats.avg, unit),
                format_value(stats.max, unit),
                stats.count
            ));
        }
        if series.len() > self.max_items {
            lines.push(format!("... and {} more series", series.len() - self.max_items));
        }
        lines.join("\n")
    }

    fn alerts_answer(&self, intent: &Intent, alerts: &[AlertRecord]) -> String {
        if alerts.is_empty() {
            return match intent.entity(ENTITY_SERVICE) {
                Some(service) => format!("Great news! No active alerts for {}.", service),
                None => "Great news! No active alerts found in your monitoring systems.".to_string(),
            };
        }

        let counts = SeverityCounts::from_alerts(alerts);
        let mut lines = vec![
            format!(
                "Found {} active {} ({}):",
                alerts.len(),
                plural(alerts.len(), "alert", "alerts"),
                counts
            ),
            String::new(),
        ];
        // Already ordered by severity, then newest first.
        for alert in alerts.iter().take(self.max_items) {
            let mut line = format!(
                "- [{}] {} on {} (since {})",
                alert.severity.as_str().to_uppercase(),
                alert.name,
                alert.service,
                alert.timestamp.format("%Y-%m-%d %H:%M UTC")
            );
            if !alert.description.is_empty() {
                line.push_str(&format!(": {}", alert.description));
            }
            lines.push(line);
        }
        if alerts.len() > self.max_items {
            lines.push(format!("... and {} more", alerts.len() - self.max_items));
        }
        lines.join("\n")
    }

    fn services_answer(&self, services: &[String], sources: usize) -> String {
        if services.is_empty() {
            return "No services found in the monitoring systems. Please check your configuration."
                .to_string();
        }
        let mut lines = vec![
            format!(
                "Found {} {} across {} data {}:",
                services.len(),
                plural(services.len(), "service", "services"),
                sources,
                plural(sources, "source", "sources")
            ),
            String::new(),
        ];
        lines.extend(
            services
                .iter()
                .take(self.max_items)
                .map(|s| format!("- {}", s)),
        );
        if services.len() > self.max_items {
            lines.push(format!("... and {} more", services.len() - self.max_items));
        }
        lines.join("\n")
    }

    fn health_answer(
        &self,
        intent: &Intent,
        metrics: Option<&[MetricPoint]>,
        alerts: Option<&[AlertRecord]>,
    ) -> Rendered {
        let status = assess_health(alerts.unwrap_or(&[]), metrics.unwrap_or(&[]));
        let heading = match intent.entity(ENTITY_SERVICE) {
            Some(service) => format!("Health of {}: {}", service, status.as_str().to_uppercase()),
            None => format!("System health: {}", status.as_str().to_uppercase()),
        };

        let mut lines = vec![heading, String::new()];
        match metrics {
            Some(metrics) => {
                let (up, total) = up_targets(metrics);
                if total > 0 {
                    lines.push(format!("- Targets up: {}/{}", up, total));
                } else {
                    lines.push("- Targets up: no liveness data reported".to_string());
                }
            }
            None => lines.push("- Targets up: unknown (metrics unavailable)".to_string()),
        }
        match alerts {
            Some([]) => lines.push("- Active alerts: none".to_string()),
            Some(alerts) => lines.push(format!(
                "- Active alerts: {} ({})",
                alerts.len(),
                SeverityCounts::from_alerts(alerts)
            )),
            None => lines.push("- Active alerts: unknown (alerts unavailable)".to_string()),
        }

        Rendered {
            text: lines.join("\n"),
            health_status: Some(status),
        }
    }
}

// =============================================================================
// Health policy
// =============================================================================

/// Any critical alert makes the system critical; a warning alert or a down
/// target makes it degraded.
pub fn assess_health(alerts: &[AlertRecord], metrics: &[MetricPoint]) -> HealthStatus {
    if alerts.iter().any(|a| a.severity == Severity::Critical) {
        return HealthStatus::Critical;
    }
    let (up, total) = up_targets(metrics);
    if alerts.iter().any(|a| a.severity == Severity::Warning) || up < total {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

/// Count targets whose latest `up` sample is non-zero.
fn up_targets(metrics: &[MetricPoint]) -> (usize, usize) {
    let mut latest: BTreeMap<(String, String, String), &MetricPoint> = BTreeMap::new();
    for point in metrics.iter().filter(|p| p.name == UP_METRIC) {
        let key = (
            point.source_connector.clone(),
            point.service().unwrap_or_default().to_string(),
            point.labels.get("instance").cloned().unwrap_or_default(),
        );
        match latest.get(&key) {
            Some(seen) if seen.timestamp >= point.timestamp => {}
            _ => {
                latest.insert(key, point);
            }
        }
    }
    let up = latest.values().filter(|p| p.value != 0.0).count();
    (up, latest.len())
}

// =============================================================================
// Helpers
// =============================================================================

/// Every failed connector across `results`, once per connector.
pub fn collect_failures(results: &[MergedResult]) -> Vec<ConnectorFailure> {
    let mut seen: BTreeMap<&str, &ConnectorFailure> = BTreeMap::new();
    for failure in results.iter().flat_map(|r| r.connectors_failed.iter()) {
        seen.entry(failure.connector.as_str()).or_insert(failure);
    }
    seen.into_values().cloned().collect()
}

fn describe_failures(failures: &[ConnectorFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.connector, f.error.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

struct SeriesStats {
    latest: f64,
    avg: f64,
    max: f64,
    count: usize,
}

impl SeriesStats {
    fn from_points(points: &[&MetricPoint]) -> Self {
        let count = points.len();
        let latest = points
            .iter()
            .max_by_key(|p| p.timestamp)
            .map_or(0.0, |p| p.value);
        let sum: f64 = points.iter().map(|p| p.value).sum();
        let max = points
            .iter()
            .map(|p| p.value)
            .fold(f64::NEG_INFINITY, f64::max);
        Self {
            latest,
            avg: if count == 0 { 0.0 } else { sum / count as f64 },
            max: if count == 0 { 0.0 } else { max },
            count,
        }
    }
}

struct SeverityCounts {
    critical: usize,
    warning: usize,
    info: usize,
}

impl SeverityCounts {
    fn from_alerts(alerts: &[AlertRecord]) -> Self {
        let count = |s: Severity| alerts.iter().filter(|a| a.severity == s).count();
        Self {
            critical: count(Severity::Critical),
            warning: count(Severity::Warning),
            info: count(Severity::Info),
        }
    }
}

impl std::fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = [
            (self.critical, "critical"),
            (self.warning, "warning"),
            (self.info, "info"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{} {}", n, label))
        .collect();
        f.write_str(&parts.join(", "))
    }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Format a metric value for display in its unit.
pub fn format_value(value: f64, unit: &str) -> String {
    match unit {
        "percent" => format!("{:.1}%", value),
        "bytes" => format_bytes(value),
        "bytes_per_second" => format!("{}/s", format_bytes(value)),
        "seconds" if value.abs() < 1.0 => format!("{:.0} ms", value * 1000.0),
        "seconds" => format!("{:.2} s", value),
        "milliseconds" => format!("{:.0} ms", value),
        "per_second" => format!("{:.2}/s", value),
        "count" if value.fract() == 0.0 => format!("{:.0}", value),
        _ => format!("{:.2}", value),
    }
}

fn format_bytes(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut scaled = value;
    let mut unit = 0;
    while scaled.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", scaled, UNITS[unit])
    } else {
        format!("{:.1} {}", scaled, UNITS[unit])
    }
}
