//! Deterministic in-process connector.
//!
//! Answers from scripted data, with optional latency and a toggleable health
//! flag. Used by the test suites and by demo deployments with no backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use vigil_core::{
    AlertRecord, ConnectorError, ConnectorResult, MetricPoint, Query, QueryKind,
};

use crate::connector::MonitoringBackend;

const ALL_KINDS: [QueryKind; 3] = [QueryKind::Metrics, QueryKind::Alerts, QueryKind::Services];

pub struct InMemoryConnector {
    name: String,
    capabilities: Vec<QueryKind>,
    metrics: Vec<MetricPoint>,
    alerts: Vec<AlertRecord>,
    services: Vec<String>,
    metric_names: Vec<String>,
    failures: HashMap<QueryKind, ConnectorError>,
    delay: Option<Duration>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    health_checks: AtomicUsize,
}

impl InMemoryConnector {
    /// A healthy connector answering every kind with empty data.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ALL_KINDS.to_vec(),
            metrics: Vec::new(),
            alerts: Vec::new(),
            services: Vec::new(),
            metric_names: Vec::new(),
            failures: HashMap::new(),
            delay: None,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<QueryKind>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricPoint>) -> Self {
        self.metric_names = metrics.iter().map(|m| m.name.clone()).collect();
        self.metric_names.sort();
        self.metric_names.dedup();
        self.metrics = metrics;
        self
    }

    pub fn with_alerts(mut self, alerts: Vec<AlertRecord>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    /// Answer every query of `kind` with this error.
    pub fn with_failure(mut self, kind: QueryKind, error: ConnectorError) -> Self {
        self.failures.insert(kind, error);
        self
    }

    /// Sleep this long before answering a query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_healthy(self, healthy: bool) -> Self {
        self.healthy.store(healthy, Ordering::SeqCst);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `query` calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of health checks received so far.
    pub fn health_check_count(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn answer(&self, query: &Query) -> ConnectorResult {
        if let Some(err) = self.failures.get(&query.kind) {
            return ConnectorResult::Error(err.clone());
        }
        match query.kind {
            QueryKind::Metrics => ConnectorResult::Metrics(
                self.metrics
                    .iter()
                    .filter(|m| {
                        query
                            .metric_name
                            .as_deref()
                            .map_or(true, |name| m.name.eq_ignore_ascii_case(name))
                    })
                    .filter(|m| m.service().map_or(true, |s| query.targets(s)))
                    .cloned()
                    .collect(),
            ),
            QueryKind::Alerts => ConnectorResult::Alerts(
                self.alerts
                    .iter()
                    .filter(|a| query.targets(&a.service))
                    .cloned()
                    .collect(),
            ),
            QueryKind::Services => ConnectorResult::Services(
                self.services
                    .iter()
                    .filter(|s| query.targets(s))
                    .cloned()
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl MonitoringBackend for InMemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[QueryKind] {
        &self.capabilities
    }

    async fn query(&self, query: &Query) -> ConnectorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer(query)
    }

    async fn list_services(&self) -> Result<Vec<String>, ConnectorError> {
        if let Some(err) = self.failures.get(&QueryKind::Services) {
            return Err(err.clone());
        }
        Ok(self.services.clone())
    }

    async fn list_metric_names(&self) -> Result<Vec<String>, ConnectorError> {
        if let Some(err) = self.failures.get(&QueryKind::Metrics) {
            return Err(err.clone());
        }
        Ok(self.metric_names.clone())
    }

    async fn health_check(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_core::{Labels, Severity};

    fn point(name: &str, service: &str, value: f64) -> MetricPoint {
        let mut labels = Labels::new();
        labels.insert("service".into(), service.into());
        MetricPoint {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            labels,
            unit: "percent".into(),
            source_connector: String::new(),
        }
    }

    fn alert(name: &str, service: &str) -> AlertRecord {
        AlertRecord {
            name: name.into(),
            severity: Severity::Warning,
            description: String::new(),
            service: service.into(),
            timestamp: Utc::now(),
            labels: Labels::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_metrics_filtered_by_service_and_name() {
        let c = InMemoryConnector::new("mem").with_metrics(vec![
            point("cpu", "checkout-service", 50.0),
            point("cpu", "payments-service", 20.0),
            point("memory", "checkout-service", 70.0),
        ]);
        let q = Query::new(QueryKind::Metrics)
            .with_service("checkout-service")
            .with_metric("cpu");
        match c.query(&q).await {
            ConnectorResult::Metrics(points) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].value, 50.0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(c.call_count(), 1);
    }

    #[tokio::test]
    async fn test_alerts_filtered_by_service() {
        let c = InMemoryConnector::new("mem").with_alerts(vec![
            alert("HighCpu", "checkout-service"),
            alert("DiskFull", "db"),
        ]);
        let q = Query::new(QueryKind::Alerts).with_service("db");
        assert_eq!(c.query(&q).await.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let c = InMemoryConnector::new("mem")
            .with_failure(QueryKind::Alerts, ConnectorError::auth("401"));
        let result = c.query(&Query::new(QueryKind::Alerts)).await;
        assert!(result.is_error());
        assert!(c.list_services().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let c = InMemoryConnector::new("mem").with_healthy(false);
        assert!(!c.health_check().await);
        c.set_healthy(true);
        assert!(c.health_check().await);
        assert_eq!(c.health_check_count(), 2);
        assert_eq!(c.call_count(), 0);
    }

    #[tokio::test]
    async fn test_metric_names_deduplicated() {
        let c = InMemoryConnector::new("mem").with_metrics(vec![
            point("cpu", "a", 1.0),
            point("cpu", "b", 2.0),
            point("memory", "a", 3.0),
        ]);
        assert_eq!(c.list_metric_names().await.unwrap(), vec!["cpu", "memory"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_before_answer() {
        let c = InMemoryConnector::new("slow").with_delay(Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        c.query(&Query::new(QueryKind::Services)).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
