pub mod config;
pub mod error;
pub mod types;

pub use config::VigilConfig;
pub use error::{ConnectorError, ConnectorErrorKind, Result, VigilError};
pub use types::*;
