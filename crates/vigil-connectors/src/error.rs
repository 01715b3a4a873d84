use thiserror::Error;
use vigil_core::VigilError;

/// Errors raised by the result cache.
///
/// Never fatal: callers fall back to fetching straight from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for VigilError {
    fn from(err: CacheError) -> Self {
        VigilError::Cache(err.to_string())
    }
}
