//! Connector capability contract and the closed set of connector variants.

use async_trait::async_trait;
use tracing::info;
use vigil_core::config::ConnectorsConfig;
use vigil_core::{ConnectorError, ConnectorResult, Query, QueryKind, VigilError};

use crate::azure::AzureMonitorConnector;
use crate::memory::InMemoryConnector;
use crate::prometheus::PrometheusConnector;

/// A monitoring backend the manager can fan a query out to.
///
/// Implementations never raise past this boundary: every failure comes back
/// as a [`ConnectorError`], either inside a [`ConnectorResult::Error`] or as
/// the `Err` side of the listing calls. Connectors hold no per-query state;
/// caching lives in the manager.
#[async_trait]
pub trait MonitoringBackend: Send + Sync {
    /// Stable name used in cache keys and result annotations.
    fn name(&self) -> &str;

    /// Query kinds this backend can answer.
    fn capabilities(&self) -> &[QueryKind];

    /// Answer a normalized query.
    async fn query(&self, query: &Query) -> ConnectorResult;

    /// List the service names this backend knows about.
    async fn list_services(&self) -> Result<Vec<String>, ConnectorError>;

    /// List the metric names this backend exposes.
    async fn list_metric_names(&self) -> Result<Vec<String>, ConnectorError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> bool;

    fn supports(&self, kind: QueryKind) -> bool {
        self.capabilities().contains(&kind)
    }
}

/// Every connector Vigil can talk to.
///
/// Dispatch is a `match` over this closed set; adding a backend means adding
/// a variant.
pub enum Connector {
    Prometheus(PrometheusConnector),
    AzureMonitor(AzureMonitorConnector),
    InMemory(InMemoryConnector),
}

impl Connector {
    /// Build the connectors configured under `[connectors]`.
    ///
    /// An empty list is valid; the API then reports itself degraded.
    pub fn from_config(config: &ConnectorsConfig) -> Result<Vec<Connector>, VigilError> {
        let mut connectors = Vec::new();
        if let Some(prom) = &config.prometheus {
            let connector = PrometheusConnector::new(prom, config.call_timeout())?;
            info!(url = %prom.url, "Prometheus connector configured");
            connectors.push(Connector::Prometheus(connector));
        }
        if let Some(azure) = &config.azure_monitor {
            let connector = AzureMonitorConnector::new(azure, config.call_timeout())?;
            info!(
                subscription = %azure.subscription_id,
                resources = azure.resource_ids.len(),
                "Azure Monitor connector configured"
            );
            connectors.push(Connector::AzureMonitor(connector));
        }
        Ok(connectors)
    }

    fn backend(&self) -> &dyn MonitoringBackend {
        match self {
            Connector::Prometheus(c) => c,
            Connector::AzureMonitor(c) => c,
            Connector::InMemory(c) => c,
        }
    }
}

#[async_trait]
impl MonitoringBackend for Connector {
    fn name(&self) -> &str {
        self.backend().name()
    }

    fn capabilities(&self) -> &[QueryKind] {
        self.backend().capabilities()
    }

    async fn query(&self, query: &Query) -> ConnectorResult {
        match self {
            Connector::Prometheus(c) => c.query(query).await,
            Connector::AzureMonitor(c) => c.query(query).await,
            Connector::InMemory(c) => c.query(query).await,
        }
    }

    async fn list_services(&self) -> Result<Vec<String>, ConnectorError> {
        match self {
            Connector::Prometheus(c) => c.list_services().await,
            Connector::AzureMonitor(c) => c.list_services().await,
            Connector::InMemory(c) => c.list_services().await,
        }
    }

    async fn list_metric_names(&self) -> Result<Vec<String>, ConnectorError> {
        match self {
            Connector::Prometheus(c) => c.list_metric_names().await,
            Connector::AzureMonitor(c) => c.list_metric_names().await,
            Connector::InMemory(c) => c.list_metric_names().await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            Connector::Prometheus(c) => c.health_check().await,
            Connector::AzureMonitor(c) => c.health_check().await,
            Connector::InMemory(c) => c.health_check().await,
        }
    }
}

impl From<InMemoryConnector> for Connector {
    fn from(c: InMemoryConnector) -> Self {
        Connector::InMemory(c)
    }
}

impl From<PrometheusConnector> for Connector {
    fn from(c: PrometheusConnector) -> Self {
        Connector::Prometheus(c)
    }
}

impl From<AzureMonitorConnector> for Connector {
    fn from(c: AzureMonitorConnector) -> Self {
        Connector::AzureMonitor(c)
    }
}
