//! Dual-sink delivery of flushed batches
//!
//! ```text
//! DeliveryRecord ──► monitoring sink (raw payload, best-effort)
//!        └─────────► business sink ──► monitoring sink ({"api_result": ...})
//! ```
//!
//! Flushes hand records to an [`Outbox`]; a single [`delivery_worker`] task
//! drains it so sink latency never reaches the ingestion path.

use super::record::{ApiResult, ApiResultEnvelope, DeliveryRecord};
use super::sink::Sink;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What happened to the business-sink call for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed { error: String },
}

pub struct DeliveryPipeline {
    monitor: Arc<dyn Sink>,
    business: Arc<dyn Sink>,
}

impl DeliveryPipeline {
    pub fn new(monitor: Arc<dyn Sink>, business: Arc<dyn Sink>) -> Self {
        Self { monitor, business }
    }

    /// Send `record` to both sinks
    ///
    /// Never fails: business-sink errors are relayed to the monitoring sink,
    /// monitoring-sink errors are logged. The raw monitoring post and the
    /// business call run concurrently. The `api_result` relay is sent only
    /// after the raw post has finished, so the monitor always sees the batch
    /// before its result.
    pub async fn deliver(&self, record: DeliveryRecord) -> DeliveryOutcome {
        let payload = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(e) => {
                log::error!("❌ Failed to serialize batch ({} tags): {}", record.id_hex.len(), e);
                return DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let (_, (api_result, outcome)) = tokio::join!(
            self.post_monitor(&payload, "batch"),
            self.call_business(&payload, record.clone())
        );

        match serde_json::to_value(ApiResultEnvelope { api_result }) {
            Ok(envelope) => self.post_monitor(&envelope, "api_result").await,
            Err(e) => log::error!("❌ Failed to serialize api_result envelope: {}", e),
        }

        log::info!(
            "📦 Flushed {} tags (reader={}, antenna={}, ts={})",
            record.id_hex.len(),
            record.reader_id,
            record.antenna,
            record.timestamp
        );

        outcome
    }

    async fn call_business(&self, payload: &serde_json::Value, record: DeliveryRecord) -> (ApiResult, DeliveryOutcome) {
        match self.business.post(payload).await {
            Ok(response) => {
                log::debug!(
                    "✅ POST to API OK: {} - {}",
                    response.status,
                    response.body
                );
                let outcome = DeliveryOutcome::Delivered {
                    status: response.status,
                };
                (
                    ApiResult::Success {
                        status: response.status,
                        response: response.body,
                        original_payload: record,
                    },
                    outcome,
                )
            }
            Err(e) => {
                log::error!("❌ HTTP POST to API {} failed: {}", self.business.describe(), e);
                let error = e.to_string();
                (
                    ApiResult::Failure {
                        error: error.clone(),
                        original_payload: record,
                    },
                    DeliveryOutcome::Failed { error },
                )
            }
        }
    }

    /// Best-effort post; errors end here
    async fn post_monitor(&self, body: &serde_json::Value, kind: &str) {
        match self.monitor.post(body).await {
            Ok(response) => {
                log::debug!("POST {} to monitor OK: {}", kind, response.status);
            }
            Err(e) => {
                log::error!("HTTP POST {} to monitor {} failed: {}", kind, self.monitor.describe(), e);
            }
        }
    }
}

/// Sending half of the delivery queue
///
/// Unbounded so a flush never waits on a slow sink.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<DeliveryRecord>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeliveryRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `record` for delivery; dropped with an error log if the worker is gone
    pub fn send(&self, record: DeliveryRecord) {
        if let Err(e) = self.tx.send(record) {
            log::error!(
                "❌ Delivery worker stopped, dropping batch of {} tags",
                e.0.id_hex.len()
            );
        }
    }
}

/// Deliver queued records one at a time until every [`Outbox`] is dropped
///
/// Returns the number of records processed.
pub async fn delivery_worker(
    mut rx: mpsc::UnboundedReceiver<DeliveryRecord>,
    pipeline: Arc<DeliveryPipeline>,
) -> u64 {
    log::info!("🚚 Delivery worker started");
    let mut delivered = 0u64;

    while let Some(record) = rx.recv().await {
        match pipeline.deliver(record).await {
            DeliveryOutcome::Delivered { status } => {
                log::debug!("Batch delivered (status {})", status);
            }
            DeliveryOutcome::Failed { error } => {
                log::warn!("⚠️  Batch not accepted by business API: {}", error);
            }
        }
        delivered += 1;
    }

    log::info!("✅ Delivery worker stopped ({} batches)", delivered);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::sink::{SinkError, SinkResponse};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Sink that records every body and answers with a canned result
    struct RecordingSink {
        bodies: Mutex<Vec<Value>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn bodies(&self) -> Vec<Value> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn post(&self, body: &Value) -> Result<SinkResponse, SinkError> {
            self.bodies.lock().unwrap().push(body.clone());
            if self.fail {
                Err(SinkError::Transport("connection refused".to_string()))
            } else {
                Ok(SinkResponse {
                    status: 200,
                    body: r#"{"message":"ok"}"#.to_string(),
                })
            }
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    fn create_test_record() -> DeliveryRecord {
        DeliveryRecord {
            reader_id: "reader-1".to_string(),
            antenna: "1".to_string(),
            id_hex: vec!["A".to_string(), "B".to_string()],
            timestamp: "2024-05-01T14:03:07.000+0700".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_relays_status_and_response() {
        let monitor = RecordingSink::new(false);
        let business = RecordingSink::new(false);
        let pipeline = DeliveryPipeline::new(monitor.clone(), business.clone());

        let outcome = pipeline.deliver(create_test_record()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });

        assert_eq!(business.bodies().len(), 1);
        assert_eq!(business.bodies()[0]["idHex"], serde_json::json!(["A", "B"]));

        let monitor_bodies = monitor.bodies();
        assert_eq!(monitor_bodies.len(), 2);
        assert_eq!(monitor_bodies[0]["reader_id"], "reader-1");
        let api_result = &monitor_bodies[1]["api_result"];
        assert_eq!(api_result["status"], 200);
        assert_eq!(api_result["response"], r#"{"message":"ok"}"#);
        assert_eq!(api_result["original_payload"], monitor_bodies[0]);
    }

    #[tokio::test]
    async fn test_business_failure_relayed_once() {
        let monitor = RecordingSink::new(false);
        let business = RecordingSink::new(true);
        let pipeline = DeliveryPipeline::new(monitor.clone(), business.clone());

        let outcome = pipeline.deliver(create_test_record()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));

        let relays: Vec<Value> = monitor
            .bodies()
            .into_iter()
            .filter(|b| b.get("api_result").is_some())
            .collect();
        assert_eq!(relays.len(), 1);
        assert!(relays[0]["api_result"]["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
        assert_eq!(relays[0]["api_result"]["original_payload"]["idHex"], serde_json::json!(["A", "B"]));
    }

    #[tokio::test]
    async fn test_monitor_failure_does_not_block_business() {
        let monitor = RecordingSink::new(true);
        let business = RecordingSink::new(false);
        let pipeline = DeliveryPipeline::new(monitor.clone(), business.clone());

        let outcome = pipeline.deliver(create_test_record()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });
        assert_eq!(business.bodies().len(), 1);
        // Raw batch plus the api_result relay were both attempted
        assert_eq!(monitor.bodies().len(), 2);
    }

    /// Monitor that answers the raw batch post slowly
    struct SlowBatchMonitor {
        inner: Arc<RecordingSink>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl Sink for SlowBatchMonitor {
        async fn post(&self, body: &Value) -> Result<SinkResponse, SinkError> {
            if body.get("idHex").is_some() {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.post(body).await
        }

        fn describe(&self) -> String {
            "slow".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_reaches_monitor_after_raw_batch() {
        let recorded = RecordingSink::new(false);
        let monitor = Arc::new(SlowBatchMonitor {
            inner: recorded.clone(),
            delay: std::time::Duration::from_millis(1500),
        });
        let business = RecordingSink::new(false);
        let pipeline = DeliveryPipeline::new(monitor, business.clone());

        let outcome = pipeline.deliver(create_test_record()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });

        let bodies = recorded.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].get("idHex").is_some());
        assert!(bodies[1].get("api_result").is_some());
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_stops() {
        let monitor = RecordingSink::new(false);
        let business = RecordingSink::new(false);
        let pipeline = Arc::new(DeliveryPipeline::new(monitor, business.clone()));

        let (outbox, rx) = Outbox::channel();
        let worker = tokio::spawn(delivery_worker(rx, pipeline));

        outbox.send(create_test_record());
        outbox.send(create_test_record());
        drop(outbox);

        assert_eq!(worker.await.unwrap(), 2);
        assert_eq!(business.bodies().len(), 2);
    }
}
