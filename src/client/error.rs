use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client")]
    Build(#[source] reqwest::Error),
}

/// A request that never produced an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Network request failed for {0}")]
    Network(String, #[source] reqwest::Error),
}
