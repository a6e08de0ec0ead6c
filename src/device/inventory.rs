//! Inventory session control and reader identity
//!
//! The reader only streams tag reads while an inventory session is running.
//! The session is started once at startup and stopped once at shutdown.

use super::backoff::ExponentialBackoff;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug)]
pub enum InventoryError {
    Http(String),
    Status(u16),
    InvalidResponse(String),
    RetriesExhausted { operation: String, last_error: String },
}

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        InventoryError::Http(err.to_string())
    }
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::Http(e) => write!(f, "HTTP error: {}", e),
            InventoryError::Status(code) => write!(f, "Reader API returned status {}", code),
            InventoryError::InvalidResponse(msg) => write!(f, "Invalid reader API response: {}", msg),
            InventoryError::RetriesExhausted { operation, last_error } => {
                write!(f, "{} failed after retries: {}", operation, last_error)
            }
        }
    }
}

impl std::error::Error for InventoryError {}

#[async_trait]
pub trait InventoryControl: Send + Sync {
    async fn start_inventory(&self) -> Result<(), InventoryError>;
    async fn stop_inventory(&self) -> Result<(), InventoryError>;
    async fn reader_version(&self) -> Result<String, InventoryError>;
    async fn reader_serial(&self) -> Result<String, InventoryError>;
}

/// Client for the reader's local REST API
///
/// - `PUT  {base}/cloud/start`
/// - `PUT  {base}/cloud/stop`
/// - `GET  {base}/cloud/version` (JSON, `serialNumber` holds the serial)
pub struct RestInventoryClient {
    client: reqwest::Client,
    base_url: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl RestInventoryClient {
    pub fn new(base_url: &str, retry_count: u32, timeout: Duration) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_count,
            retry_delay: Duration::from_millis(500),
        })
    }

    async fn put(&self, path: &str) -> Result<(), InventoryError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.put(&url).send().await?;
        if !response.status().is_success() {
            return Err(InventoryError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn version_document(&self) -> Result<serde_json::Value, InventoryError> {
        let url = format!("{}/cloud/version", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(InventoryError::Status(response.status().as_u16()));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| InventoryError::InvalidResponse(e.to_string()))
    }

    /// Attempt once plus `retry_count` retries with exponential backoff
    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, InventoryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, InventoryError>>,
    {
        let mut backoff = ExponentialBackoff::new(self.retry_delay, Duration::from_secs(5), self.retry_count);

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!("⚠️  Reader API {} failed: {}", operation, e);
                    if backoff.sleep().await.is_err() {
                        return Err(InventoryError::RetriesExhausted {
                            operation: operation.to_string(),
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl InventoryControl for RestInventoryClient {
    async fn start_inventory(&self) -> Result<(), InventoryError> {
        self.with_retries("start inventory", || self.put("/cloud/start")).await
    }

    async fn stop_inventory(&self) -> Result<(), InventoryError> {
        self.with_retries("stop inventory", || self.put("/cloud/stop")).await
    }

    async fn reader_version(&self) -> Result<String, InventoryError> {
        let doc = self.with_retries("get version", || self.version_document()).await?;
        Ok(version_from_document(&doc))
    }

    async fn reader_serial(&self) -> Result<String, InventoryError> {
        let doc = self.with_retries("get serial", || self.version_document()).await?;
        doc.get("serialNumber")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| InventoryError::InvalidResponse("missing serialNumber".to_string()))
    }
}

/// Prefer the reader application version; fall back to the whole document
fn version_from_document(doc: &serde_json::Value) -> String {
    doc.get("readerApplication")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| doc.to_string())
}

/// Used when no reader API is configured: sessions are managed elsewhere
pub struct DetachedInventory;

#[async_trait]
impl InventoryControl for DetachedInventory {
    async fn start_inventory(&self) -> Result<(), InventoryError> {
        log::info!("Inventory session control detached, not starting");
        Ok(())
    }

    async fn stop_inventory(&self) -> Result<(), InventoryError> {
        log::info!("Inventory session control detached, not stopping");
        Ok(())
    }

    async fn reader_version(&self) -> Result<String, InventoryError> {
        Ok("unknown".to_string())
    }

    async fn reader_serial(&self) -> Result<String, InventoryError> {
        Ok("unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_from_document() {
        let doc = json!({"readerApplication": "3.21.7", "serialNumber": "2047800001"});
        assert_eq!(version_from_document(&doc), "3.21.7");

        let doc = json!({"firmware": "1.0"});
        assert_eq!(version_from_document(&doc), r#"{"firmware":"1.0"}"#);
    }

    #[tokio::test]
    async fn test_retries_exhausted_against_closed_port() {
        let client = RestInventoryClient::new("http://127.0.0.1:9", 2, Duration::from_millis(200)).unwrap();

        let result = client.start_inventory().await;
        assert!(matches!(
            result,
            Err(InventoryError::RetriesExhausted { ref operation, .. }) if operation == "start inventory"
        ));
    }

    #[tokio::test]
    async fn test_detached_inventory_is_noop() {
        let inventory = DetachedInventory;
        assert!(inventory.start_inventory().await.is_ok());
        assert_eq!(inventory.reader_serial().await.unwrap(), "unknown");
    }
}
