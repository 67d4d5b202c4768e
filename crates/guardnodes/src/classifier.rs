use guardcore::{NodeContext, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Config key that overrides a node's call timeout
pub const TIMEOUT_MS: &str = "timeout_ms";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("No endpoint configured")]
    NotConfigured,

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// JSON-over-HTTP client for an external classifier or enrichment service.
///
/// Every call is bounded by a timeout; callers turn any error into their
/// own deterministic fallback.
#[derive(Clone)]
pub struct ClassifierClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    timeout: Duration,
}

impl ClassifierClient {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timeout for one invocation: `timeout_ms` from the node config, else
    /// the client default
    pub fn timeout_for(&self, ctx: &NodeContext) -> Duration {
        ctx.config_f64(TIMEOUT_MS)
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(self.timeout)
    }

    /// POST to the configured endpoint and return the response object
    pub async fn classify<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, ClassifierError> {
        let url = self.endpoint.as_deref().ok_or(ClassifierError::NotConfigured)?;
        self.post_json(url, payload, timeout).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, ClassifierError> {
        let request = async {
            let response = self.client.post(url).json(payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ClassifierError::Status(status.as_u16()));
            }
            let body: serde_json::Value = response.json().await?;
            Ok(body)
        };

        let body = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ClassifierError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        match Value::from(body) {
            Value::Object(map) => Ok(map),
            other => Err(ClassifierError::Malformed(format!(
                "expected object, got {}",
                other.type_name()
            ))),
        }
    }
}
