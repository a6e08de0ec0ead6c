//! JSON POST sinks
//!
//! Both downstream endpoints take a JSON body and answer with an arbitrary
//! text body. The pipeline only depends on the [`Sink`] trait; [`HttpSink`]
//! is the `reqwest` implementation used at runtime.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Status and raw body returned by a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum SinkError {
    /// Connection refused, DNS failure, TLS error, ...
    Transport(String),
    Timeout,
    /// Response body could not be decoded as UTF-8
    Decode(String),
    Serialization(serde_json::Error),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SinkError::Timeout
        } else if err.is_decode() {
            SinkError::Decode(err.to_string())
        } else {
            SinkError::Transport(err.to_string())
        }
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Transport(e) => write!(f, "Transport error: {}", e),
            SinkError::Timeout => write!(f, "Request timed out"),
            SinkError::Decode(e) => write!(f, "Response decode error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for JSON documents
#[async_trait]
pub trait Sink: Send + Sync {
    async fn post(&self, body: &Value) -> Result<SinkResponse, SinkError>;

    /// Endpoint description for logging
    fn describe(&self) -> String;
}

/// `POST {base_url}{path}` with a JSON body and a bounded timeout
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: join_url(base_url, path),
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn post(&self, body: &Value) -> Result<SinkResponse, SinkError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = String::from_utf8(bytes.to_vec()).map_err(|e| SinkError::Decode(e.to_string()))?;

        Ok(SinkResponse { status, body })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
