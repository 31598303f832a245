use crate::client::error::{ClientError, TransportError};
use crate::credentials::pool::Credential;
use async_trait::async_trait;
use log::trace;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the API key on every request.
const API_KEY_HEADER: &str = "api_key";

/// Status and raw body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one authenticated GET. Implementations perform no retries.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: ApiTransport + ?Sized> ApiTransport for Arc<T> {
    async fn get(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        (**self).get(url, credential).await
    }
}

/// `reqwest` backed transport.
pub struct HttpTransport {
    download_client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let download_client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { download_client })
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        trace!("GET {} with {}", url, credential);
        let response = self
            .download_client
            .get(url)
            .header(API_KEY_HEADER, credential.secret())
            .send()
            .await
            .map_err(|e| to_transport_error(url, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| to_transport_error(url, e))?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn to_transport_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else {
        TransportError::Network(url.to_string(), e)
    }
}
