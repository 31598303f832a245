//! Scripted in-memory transport for tests.

use crate::client::error::TransportError;
use crate::client::transport::{ApiTransport, TransportResponse};
use crate::credentials::pool::Credential;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

type Handler =
    Box<dyn Fn(&str, &Credential) -> Result<TransportResponse, TransportError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub url: String,
    pub credential: String,
}

pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Credential) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            credential: credential.alias().to_string(),
        });
        (self.handler)(url, credential)
    }
}

pub fn json_response(status: u16, body: Value) -> TransportResponse {
    TransportResponse {
        status,
        body: body.to_string().into_bytes(),
    }
}
