//! Inbound message handling: normalize, route, filter, batch
//!
//! Lock discipline: the cooldown map and the batch window each sit behind
//! their own `std::sync::Mutex`, held only for the in-memory transition.
//! Keyboard output and batch delivery happen after the lock is released.

use super::lifecycle::LifecycleState;
use crate::clock::{to_time_delta, Clock};
use crate::config::RelayConfig;
use crate::cooldown::CooldownFilter;
use crate::delivery::Outbox;
use crate::device::{InboundMessage, MessageKind, ReaderDevice};
use crate::event::{normalize, ChannelRoute, EventError, NormalizedEvent, RoutingRules};
use crate::window::BatchAggregator;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// What the relay did with one inbound message
#[derive(Debug)]
pub enum Disposition {
    /// Not a JSON data message
    Ignored,
    /// Failed normalization
    Dropped(EventError),
    KeyboardSent,
    KeyboardSuppressed,
    /// Passed the cooldown but the device write failed
    KeyboardFailed,
    /// Admitted to the batch window; `flushed` when it closed the previous window
    Batched { inserted: bool, flushed: bool },
    Unrouted { antenna: i64 },
}

pub struct TagRelay {
    routing: RoutingRules,
    utc_offset: FixedOffset,
    cooldown: Mutex<CooldownFilter>,
    aggregator: Arc<Mutex<BatchAggregator>>,
    device: Arc<dyn ReaderDevice>,
    outbox: Outbox,
}

impl TagRelay {
    pub fn new(
        config: &RelayConfig,
        aggregator: Arc<Mutex<BatchAggregator>>,
        device: Arc<dyn ReaderDevice>,
        outbox: Outbox,
    ) -> Self {
        Self {
            routing: config.routing.clone(),
            utc_offset: config.utc_offset,
            cooldown: Mutex::new(CooldownFilter::new(to_time_delta(config.keyboard_cooldown))),
            aggregator,
            device,
            outbox,
        }
    }

    /// Process one message observed at `now`; never fails
    pub async fn handle_message(&self, message: &InboundMessage, now: DateTime<Utc>) -> Disposition {
        if message.kind != MessageKind::Json {
            log::debug!("Ignoring non-JSON reader message ({:?})", message.kind);
            return Disposition::Ignored;
        }

        let normalized = match normalize(&message.payload, now, &self.utc_offset) {
            Ok(normalized) => normalized,
            Err(e) => {
                log::warn!("⚠️  Failed to process tag: {}", e);
                return Disposition::Dropped(e);
            }
        };

        match self.routing.classify(normalized.event.antenna) {
            ChannelRoute::Keyboard => self.send_to_keyboard(&normalized.event.id_hex, now).await,
            ChannelRoute::Batch => self.admit_to_batch(&normalized, now),
            ChannelRoute::Unrouted => {
                log::debug!(
                    "Tag {} on antenna {} matches no route",
                    normalized.event.id_hex,
                    normalized.event.antenna
                );
                Disposition::Unrouted {
                    antenna: normalized.event.antenna,
                }
            }
        }
    }

    async fn send_to_keyboard(&self, id_hex: &str, now: DateTime<Utc>) -> Disposition {
        let (accepted, tracked) = {
            let mut cooldown = self.cooldown.lock().unwrap_or_else(|e| e.into_inner());
            (cooldown.should_send(id_hex, now), cooldown.tracked())
        };

        if !accepted {
            log::debug!("Ignored duplicate keyboard tag {}", id_hex);
            return Disposition::KeyboardSuppressed;
        }
        log::trace!("Cooldown tracking {} keyboard tags", tracked);

        let line = format!("{}\n", id_hex);
        match self.device.send_output(line.as_bytes()).await {
            Ok(()) => {
                log::debug!("⌨️  Sent to keyboard: {}", id_hex);
                Disposition::KeyboardSent
            }
            Err(e) => {
                log::error!("❌ Keyboard output failed for {}: {}", id_hex, e);
                Disposition::KeyboardFailed
            }
        }
    }

    fn admit_to_batch(&self, normalized: &NormalizedEvent, now: DateTime<Utc>) -> Disposition {
        let admission = {
            let mut aggregator = self.aggregator.lock().unwrap_or_else(|e| e.into_inner());
            aggregator.admit(&normalized.event, &normalized.timestamp, now)
        };

        let flushed = admission.flushed.is_some();
        if let Some(record) = admission.flushed {
            log::debug!("Window idle gap exceeded, flushing {} tags", record.id_hex.len());
            self.outbox.send(record);
        }

        if admission.inserted {
            log::debug!(
                "Batched {} (antenna {})",
                normalized.event.id_hex,
                normalized.event.antenna
            );
        }

        Disposition::Batched {
            inserted: admission.inserted,
            flushed,
        }
    }
}

/// Consume reader messages until the lifecycle leaves `Running` or the input closes
///
/// Returns the number of messages handled.
pub async fn ingestion_task(
    relay: Arc<TagRelay>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    clock: Arc<dyn Clock>,
    mut lifecycle: watch::Receiver<LifecycleState>,
) -> u64 {
    log::info!("📥 Ingestion started, waiting for tag reads...");
    let mut handled = 0u64;

    loop {
        if *lifecycle.borrow_and_update() != LifecycleState::Running {
            log::info!("Stop requested, no longer accepting reader input");
            break;
        }

        tokio::select! {
            biased;

            changed = lifecycle.changed() => {
                if changed.is_err() {
                    log::warn!("⚠️  Lifecycle controller dropped, stopping ingestion");
                    break;
                }
            }

            message = inbound.recv() => {
                match message {
                    Some(message) => {
                        relay.handle_message(&message, clock.now()).await;
                        handled += 1;
                    }
                    None => {
                        log::warn!("⚠️  Reader input closed, stopping ingestion");
                        break;
                    }
                }
            }
        }
    }

    log::info!("✅ Ingestion stopped ({} messages)", handled);
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::DeliveryRecord;
    use crate::device::DeviceError;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct RecordingDevice {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ReaderDevice for RecordingDevice {
        async fn send_output(&self, data: &[u8]) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    struct BrokenDevice;

    #[async_trait]
    impl ReaderDevice for BrokenDevice {
        async fn send_output(&self, _data: &[u8]) -> Result<(), DeviceError> {
            Err(DeviceError::Closed)
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn tag(id_hex: &str, antenna: i64) -> InboundMessage {
        InboundMessage::json(format!(
            r#"{{"data":{{"idHex":"{}","antenna":{},"hostName":"reader-1"}}}}"#,
            id_hex, antenna
        ))
    }

    fn setup(device: Arc<dyn ReaderDevice>) -> (TagRelay, Arc<Mutex<BatchAggregator>>, UnboundedReceiver<DeliveryRecord>) {
        let config = RelayConfig::default();
        let aggregator = Arc::new(Mutex::new(BatchAggregator::new(
            to_time_delta(config.batch_window),
            config.logical_channel.clone(),
        )));
        let (outbox, rx) = Outbox::channel();
        let relay = TagRelay::new(&config, aggregator.clone(), device, outbox);
        (relay, aggregator, rx)
    }

    #[tokio::test]
    async fn test_keyboard_cooldown_single_send() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, aggregator, _rx) = setup(device.clone());

        assert!(matches!(relay.handle_message(&tag("K", 8), t(0)).await, Disposition::KeyboardSent));
        assert!(matches!(relay.handle_message(&tag("K", 8), t(1)).await, Disposition::KeyboardSuppressed));
        assert!(matches!(relay.handle_message(&tag("K", 8), t(3)).await, Disposition::KeyboardSent));

        assert_eq!(*device.sent.lock().unwrap(), vec![b"K\n".to_vec(), b"K\n".to_vec()]);
        // Keyboard tags never reach the batch window
        assert!(aggregator.lock().unwrap().live_window().is_none());
    }

    #[tokio::test]
    async fn test_cooldown_does_not_affect_batching() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, aggregator, _rx) = setup(device.clone());

        relay.handle_message(&tag("A", 8), t(0)).await;
        let disposition = relay.handle_message(&tag("A", 2), t(1)).await;
        assert!(matches!(disposition, Disposition::Batched { inserted: true, flushed: false }));

        let aggregator = aggregator.lock().unwrap();
        assert_eq!(aggregator.live_window().unwrap().identifiers(), ["A".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_flush_on_idle_gap_goes_to_outbox() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, _aggregator, mut rx) = setup(device);

        relay.handle_message(&tag("A", 3), t(0)).await;
        relay.handle_message(&tag("B", 5), t(2)).await;
        let disposition = relay.handle_message(&tag("C", 1), t(10)).await;
        assert!(matches!(disposition, Disposition::Batched { flushed: true, .. }));

        let record = rx.try_recv().unwrap();
        assert_eq!(record.id_hex, vec!["A", "B"]);
        assert_eq!(record.reader_id, "reader-1");
        assert_eq!(record.antenna, "1");
        assert_eq!(record.timestamp, "1970-01-01T07:00:00.000+0700");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_messages_are_dropped() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, _aggregator, _rx) = setup(device);

        let malformed = InboundMessage::json("not json");
        assert!(matches!(
            relay.handle_message(&malformed, t(0)).await,
            Disposition::Dropped(EventError::Malformed(_))
        ));

        let empty = InboundMessage::json(r#"{"data":{"idHex":"","antenna":3}}"#);
        assert!(matches!(
            relay.handle_message(&empty, t(0)).await,
            Disposition::Dropped(EventError::MissingIdentifier)
        ));

        let text = InboundMessage {
            kind: MessageKind::Text,
            payload: b"hello".to_vec(),
        };
        assert!(matches!(relay.handle_message(&text, t(0)).await, Disposition::Ignored));

        assert!(matches!(
            relay.handle_message(&tag("Z", 12), t(0)).await,
            Disposition::Unrouted { antenna: 12 }
        ));
    }

    #[tokio::test]
    async fn test_keyboard_failure_is_not_fatal() {
        let (relay, _aggregator, _rx) = setup(Arc::new(BrokenDevice));

        assert!(matches!(relay.handle_message(&tag("K", 8), t(0)).await, Disposition::KeyboardFailed));
        assert!(matches!(relay.handle_message(&tag("A", 1), t(0)).await, Disposition::Batched { .. }));
    }

    #[tokio::test]
    async fn test_ingestion_task_stops_on_lifecycle_change() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, _aggregator, _rx) = setup(device.clone());
        let (tx, rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Running);
        let clock = Arc::new(ManualClock::at_epoch());

        let handle = tokio::spawn(ingestion_task(Arc::new(relay), rx, clock, state_rx));

        tx.send(tag("K", 8)).await.unwrap();
        tokio::task::yield_now().await;
        state_tx.send(LifecycleState::Stopping).unwrap();

        let handled = handle.await.unwrap();
        assert!(handled <= 1);
    }

    #[tokio::test]
    async fn test_ingestion_task_stops_when_input_closes() {
        let device = Arc::new(RecordingDevice::default());
        let (relay, _aggregator, _rx) = setup(device.clone());
        let (tx, rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = watch::channel(LifecycleState::Running);
        let clock = Arc::new(ManualClock::at_epoch());

        tx.send(tag("K", 8)).await.unwrap();
        tx.send(tag("K", 8)).await.unwrap();
        drop(tx);

        let handled = ingestion_task(Arc::new(relay), rx, clock, state_rx).await;
        assert_eq!(handled, 2);
        assert_eq!(device.sent.lock().unwrap().len(), 1);
    }
}
