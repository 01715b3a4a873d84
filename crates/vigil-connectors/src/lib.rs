pub mod azure;
pub mod cache;
pub mod connector;
pub mod error;
mod http;
pub mod manager;
pub mod memory;
pub mod prometheus;

pub use cache::{CacheKey, CacheStats, CacheTtls, ResultCache};
pub use connector::{Connector, MonitoringBackend};
pub use error::CacheError;
pub use manager::{ConnectorFailure, ConnectorManager, ConnectorSummary, MergedResult};
pub use memory::InMemoryConnector;
