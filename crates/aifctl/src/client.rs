//! HTTP client for the aifd control plane.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("daemon not reachable at {0}; is aifd running?")]
    NotReachable(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Exit code contract: 1 user-correctable, 2 precondition failed,
    /// 64 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Api { status, .. } => match status {
                400 | 404 => 1,
                409 => 2,
                _ => 64,
            },
            Self::NotReachable(_) => 1,
            _ => 64,
        }
    }
}

/// Thin JSON client over the daemon's local HTTP surface.
#[derive(Debug, Clone)]
pub struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn handle(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            Err(ClientError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|_| ClientError::NotReachable(self.base.clone()))?;
        self.handle(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|_| ClientError::NotReachable(self.base.clone()))?;
        self.handle(response).await
    }
}
