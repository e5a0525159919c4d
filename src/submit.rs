use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// The endpoint's verdict on a single command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitOutcome {
    pub fn accepted() -> Self {
        Self { success: true, error: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { success: false, error: Some(reason.into()) }
    }
}

/// Anything that stops us from getting a definite answer from the server.
/// All variants are treated as network-level failures and retried later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("unreadable response: {0}")]
    Decode(String),
}

/// Capability to submit one opaque command envelope.
#[async_trait]
pub trait CommandSubmitter: Send + Sync {
    async fn submit_raw(&self, command: &serde_json::Value)
    -> Result<SubmitOutcome, TransportError>;
}

/// Supplies the bearer token for authenticated submissions.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Token provider for a fixed token, or none at all.
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// `CommandSubmitter` speaking JSON over HTTP to the command endpoint.
///
/// Status mapping:
/// - 2xx: body parsed as `SubmitOutcome`; an empty body counts as success.
/// - 4xx: explicit rejection, the body text (or its `error` field) is the reason.
/// - 5xx, timeouts, connection errors: `TransportError`.
pub struct HttpCommandClient {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpCommandClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/api/v1/commands", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, tokens })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandSubmitter for HttpCommandClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn submit_raw(
        &self,
        command: &serde_json::Value,
    ) -> Result<SubmitOutcome, TransportError> {
        let mut req = self.client.post(&self.endpoint).json(command);
        if let Some(token) = self.tokens.access_token().await {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(map_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_reqwest)?;
        debug!(status = status.as_u16(), "command endpoint responded");

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(SubmitOutcome::accepted());
            }
            return serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()));
        }
        if status.is_client_error() {
            let reason = serde_json::from_str::<SubmitOutcome>(&body)
                .ok()
                .and_then(|o| o.error)
                .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body });
            return Ok(SubmitOutcome::rejected(reason));
        }
        Err(TransportError::Server { status: status.as_u16(), body })
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Connection(e.to_string())
    }
}
