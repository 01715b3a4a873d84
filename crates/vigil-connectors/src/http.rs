//! Shared HTTP plumbing for the wire connectors.
//!
//! Every transport failure is folded into a [`ConnectorError`] here so the
//! connectors themselves never surface a `reqwest::Error`.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use vigil_core::{ConnectorError, VigilError};

/// Build the HTTP client a connector owns.
///
/// `timeout` is the client-level ceiling; the manager applies its own
/// per-call timeout on top.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, VigilError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| VigilError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport-level failure onto a connector error kind.
pub(crate) fn map_transport_error(connector: &str, err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::timeout(format!("{} request timed out", connector))
    } else if err.is_decode() {
        ConnectorError::malformed(format!("{} returned an undecodable body: {}", connector, err))
    } else {
        ConnectorError::unavailable(format!("{} unreachable: {}", connector, err))
    }
}

/// Map a non-success status code onto a connector error kind.
pub(crate) fn map_status(connector: &str, status: StatusCode) -> Result<(), ConnectorError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectorError::auth(format!(
            "{} rejected credentials ({})",
            connector, status
        ))),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Err(
            ConnectorError::malformed(format!("{} rejected the query ({})", connector, status)),
        ),
        _ => Err(ConnectorError::unavailable(format!(
            "{} answered {}",
            connector, status
        ))),
    }
}

/// Send a request and decode a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    connector: &str,
    request: RequestBuilder,
) -> Result<T, ConnectorError> {
    let response = request
        .send()
        .await
        .map_err(|e| map_transport_error(connector, e))?;
    map_status(connector, response.status())?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_transport_error(connector, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ConnectorError::malformed(format!("{} returned an undecodable body: {}", connector, e))
    })
}

/// Send a request and report only whether it succeeded.
pub(crate) async fn probe(request: RequestBuilder) -> bool {
    match request.send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ConnectorErrorKind;

    #[test]
    fn test_status_success_passes() {
        assert!(map_status("prometheus", StatusCode::OK).is_ok());
        assert!(map_status("prometheus", StatusCode::NO_CONTENT).is_ok());
    }

    #[test]
    fn test_status_auth_codes() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = map_status("azure_monitor", status).unwrap_err();
            assert_eq!(err.kind, ConnectorErrorKind::Auth);
        }
    }

    #[test]
    fn test_status_server_errors_unavailable() {
        let err = map_status("prometheus", StatusCode::BAD_GATEWAY).unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::Unavailable);
        assert!(err.message.contains("502"));
    }

    #[test]
    fn test_status_bad_request_malformed() {
        let err = map_status("prometheus", StatusCode::BAD_REQUEST).unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::Malformed);
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
