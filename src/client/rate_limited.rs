//! Single-attempt requests against the remote API, classified into
//! [`Outcome`]s.
//!
//! The remote answers most requests with a small envelope
//! (`{"estado": 200, "datos": "<url>"}`) whose `datos` URL holds the actual
//! payload, so one logical request may take two HTTP calls. Callers only see
//! the final [`Outcome`]. Retrying and rotating credentials is left to the
//! caller.

use crate::client::endpoint::ApiLayout;
use crate::client::transport::{ApiTransport, TransportResponse};
use crate::config::error::ConfigError;
use crate::credentials::pool::{Credential, CredentialPool};
use crate::types::window::CollectionWindow;
use crate::utils::decode_text;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

/// Classified result of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    RateLimited,
    TransientError(String),
    /// The remote confirmed there is no data for the request.
    NotFound,
    MalformedResponse(String),
}

impl Outcome {
    /// Whether the caller should rotate credentials before retrying.
    pub fn wants_rotation(&self) -> bool {
        matches!(self, Outcome::RateLimited | Outcome::TransientError(_))
    }

    fn from_status(status: u16, context: &str) -> Option<Outcome> {
        match status {
            200..=299 => None,
            404 => Some(Outcome::NotFound),
            429 => Some(Outcome::RateLimited),
            401 | 403 => Some(Outcome::TransientError(format!(
                "{context}: credential rejected ({status})"
            ))),
            500..=599 => Some(Outcome::TransientError(format!(
                "{context}: server error {status}"
            ))),
            other => Some(Outcome::MalformedResponse(format!(
                "{context}: unexpected status {other}"
            ))),
        }
    }
}

pub struct RateLimitedClient<T: ApiTransport> {
    transport: T,
    layout: ApiLayout,
    pools: Arc<CredentialPool>,
}

impl<T: ApiTransport> RateLimitedClient<T> {
    pub fn new(transport: T, layout: ApiLayout, pools: Arc<CredentialPool>) -> Self {
        Self {
            transport,
            layout,
            pools,
        }
    }

    pub fn pools(&self) -> &Arc<CredentialPool> {
        &self.pools
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs one logical request for `window` with the active credential
    /// of `pool_name`.
    ///
    /// Only a misconfigured pool is an error; every remote behaviour maps to
    /// an [`Outcome`].
    pub async fn request(
        &self,
        pool_name: &str,
        window: &CollectionWindow,
    ) -> Result<Outcome, ConfigError> {
        let credential = self.pools.current(pool_name)?;
        let url = self.layout.url_for(window);
        debug!("Requesting {} with {}", window, credential);

        let first = match self.call(&url, &credential).await {
            Ok(value) => value,
            Err(outcome) => return Ok(outcome),
        };

        let Some(envelope) = first.as_object() else {
            return Ok(Outcome::Success(first));
        };
        if let Some(estado) = envelope.get("estado").and_then(Value::as_u64) {
            let status = u16::try_from(estado).unwrap_or(u16::MAX);
            if let Some(outcome) = Outcome::from_status(status, &url) {
                debug!(
                    "Envelope for {} reported {}: {}",
                    window,
                    estado,
                    envelope
                        .get("descripcion")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                );
                return Ok(outcome);
            }
        }
        let Some(data_url) = envelope.get("datos").and_then(Value::as_str) else {
            return Ok(Outcome::Success(first));
        };

        match self.call(data_url, &credential).await {
            Ok(payload) => Ok(Outcome::Success(payload)),
            Err(outcome) => Ok(outcome),
        }
    }

    /// One HTTP call, returning the parsed JSON body or the outcome that ends
    /// the request.
    async fn call(&self, url: &str, credential: &Credential) -> Result<Value, Outcome> {
        let response = self
            .transport
            .get(url, credential)
            .await
            .map_err(|e| Outcome::TransientError(e.to_string()))?;
        if let Some(outcome) = Outcome::from_status(response.status, url) {
            return Err(outcome);
        }
        parse_body(&response)
            .map_err(|e| Outcome::MalformedResponse(format!("{url}: {e}")))
    }
}

/// Decodes the body as UTF-8, falling back to ISO-8859-1 which the remote
/// uses for most payloads, then parses it as JSON.
fn parse_body(response: &TransportResponse) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&decode_text(&response.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{json_response, ScriptedTransport};
    use crate::types::dataset_kind::DatasetKind;
    use crate::types::window::DateRange;
    use chrono::NaiveDate;
    use serde_json::json;

    fn pools() -> Arc<CredentialPool> {
        let mut pools = CredentialPool::new();
        pools.insert(
            "main",
            vec![Credential::new("main#0", "k0"), Credential::new("main#1", "k1")],
        );
        Arc::new(pools)
    }

    fn window() -> CollectionWindow {
        CollectionWindow::new(
            "0076",
            DatasetKind::DailyClimatology,
            DateRange::single(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        )
    }

    fn client(transport: ScriptedTransport) -> RateLimitedClient<ScriptedTransport> {
        RateLimitedClient::new(transport, ApiLayout::new("https://api.test"), pools())
    }

    #[tokio::test]
    async fn test_follows_data_pointer() -> Result<(), ConfigError> {
        let transport = ScriptedTransport::new(|url, _| {
            if url.starts_with("https://api.test/api/") {
                Ok(json_response(
                    200,
                    json!({"estado": 200, "descripcion": "exito", "datos": "https://files.test/abc"}),
                ))
            } else {
                Ok(json_response(200, json!([{"fecha": "2024-01-01"}])))
            }
        });
        let client = client(transport);
        let outcome = client.request("main", &window()).await?;
        assert_eq!(outcome, Outcome::Success(json!([{"fecha": "2024-01-01"}])));
        assert_eq!(client.transport.calls().len(), 2);
        assert_eq!(client.transport.calls()[1].url, "https://files.test/abc");
        Ok(())
    }

    #[tokio::test]
    async fn test_classifies_envelope_status() -> Result<(), ConfigError> {
        for (estado, expected) in [
            (404, Outcome::NotFound),
            (429, Outcome::RateLimited),
        ] {
            let client = client(ScriptedTransport::new(move |_, _| {
                Ok(json_response(200, json!({"estado": estado, "descripcion": "x"})))
            }));
            assert_eq!(client.request("main", &window()).await?, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_classifies_http_status() -> Result<(), ConfigError> {
        let cases = [
            (404, "NotFound"),
            (429, "RateLimited"),
            (503, "Transient"),
            (401, "Transient"),
            (400, "Malformed"),
        ];
        for (status, expected) in cases {
            let client = client(ScriptedTransport::new(move |_, _| {
                Ok(json_response(status, json!({})))
            }));
            let outcome = client.request("main", &window()).await?;
            let matched = match expected {
                "NotFound" => outcome == Outcome::NotFound,
                "RateLimited" => outcome == Outcome::RateLimited,
                "Transient" => matches!(outcome, Outcome::TransientError(_)),
                _ => matches!(outcome, Outcome::MalformedResponse(_)),
            };
            assert!(matched, "status {status} gave {outcome:?}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_malformed() -> Result<(), ConfigError> {
        let client = client(ScriptedTransport::new(|_, _| {
            Ok(TransportResponse {
                status: 200,
                body: b"<html>maintenance</html>".to_vec(),
            })
        }));
        assert!(matches!(
            client.request("main", &window()).await?,
            Outcome::MalformedResponse(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_latin1_payload_is_decoded() -> Result<(), ConfigError> {
        let mut body = b"[{\"nombre\": \"A CORU".to_vec();
        body.push(0xD1); // Ñ in ISO-8859-1
        body.extend_from_slice(b"A\"}]");
        let client = client(ScriptedTransport::new(move |_, _| {
            Ok(TransportResponse {
                status: 200,
                body: body.clone(),
            })
        }));
        let outcome = client.request("main", &window()).await?;
        assert_eq!(outcome, Outcome::Success(json!([{"nombre": "A CORUÑA"}])));
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() -> Result<(), ConfigError> {
        let client = client(ScriptedTransport::new(|url, _| {
            Err(crate::client::error::TransportError::Timeout(url.to_string()))
        }));
        assert!(client.request("main", &window()).await?.wants_rotation());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_pool_is_config_error() {
        let client = client(ScriptedTransport::new(|_, _| Ok(json_response(200, json!([])))));
        assert!(matches!(
            client.request("other", &window()).await,
            Err(ConfigError::UnknownPool(_))
        ));
        assert!(client.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_uses_active_credential() -> Result<(), ConfigError> {
        let client = client(ScriptedTransport::new(|_, _| Ok(json_response(200, json!([])))));
        client.pools().rotate("main")?;
        client.request("main", &window()).await?;
        assert_eq!(client.transport.calls()[0].credential, "main#1");
        Ok(())
    }
}
