//! Startup and shutdown ordering
//!
//! ```text
//! Running ──request_stop()──► Stopping ──final flush + drain──► Stopped
//! ```
//!
//! The signal handler only calls [`LifecycleHandle::request_stop`]. The
//! ingestion and scheduler loops observe the change, and [`RelayRuntime::run`]
//! performs the final flush once both have exited.

use super::ingestion::{ingestion_task, TagRelay};
use super::scheduler::flush_scheduler_task;
use crate::clock::{to_time_delta, Clock, MonotonicClock};
use crate::config::RelayConfig;
use crate::delivery::{delivery_worker, DeliveryPipeline, HttpSink, Outbox};
use crate::device::{DetachedInventory, InboundMessage, InventoryControl, ReaderDevice, RestInventoryClient};
use crate::error::RelayError;
use crate::window::BatchAggregator;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const READER_API_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

/// Shared handle to the controller state
#[derive(Clone)]
pub struct LifecycleHandle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Running);
        Self { state: Arc::new(tx) }
    }

    /// Move `Running` to `Stopping`; returns false if a stop was already requested
    pub fn request_stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Stopping;
                true
            } else {
                false
            }
        })
    }

    fn mark_stopped(&self) {
        self.state.send_replace(LifecycleState::Stopped);
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters reported when the runtime stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    pub scheduled_flushes: u64,
    /// Whether the terminal flush found a non-empty window
    pub final_flush: bool,
    pub batches_delivered: u64,
}

pub struct RelayRuntime {
    config: RelayConfig,
    pipeline: Arc<DeliveryPipeline>,
    device: Arc<dyn ReaderDevice>,
    inventory: Arc<dyn InventoryControl>,
    clock: Arc<dyn Clock>,
    lifecycle: LifecycleHandle,
}

impl RelayRuntime {
    pub fn new(
        config: RelayConfig,
        pipeline: Arc<DeliveryPipeline>,
        device: Arc<dyn ReaderDevice>,
        inventory: Arc<dyn InventoryControl>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            pipeline,
            device,
            inventory,
            clock,
            lifecycle: LifecycleHandle::new(),
        }
    }

    /// Wire HTTP sinks, the reader API client and a monotonic clock from `config`
    pub fn from_config(config: RelayConfig, device: Arc<dyn ReaderDevice>) -> Result<Self, RelayError> {
        let monitor = HttpSink::new(&config.monitor.base_url, &config.monitor.path, config.monitor.timeout)?;
        let business = HttpSink::new(&config.business.base_url, &config.business.path, config.business.timeout)?;
        let pipeline = Arc::new(DeliveryPipeline::new(Arc::new(monitor), Arc::new(business)));

        let inventory: Arc<dyn InventoryControl> = match &config.reader_api_url {
            Some(url) => Arc::new(RestInventoryClient::new(
                url,
                config.reader_api_retry_count,
                READER_API_TIMEOUT,
            )?),
            None => Arc::new(DetachedInventory),
        };

        Ok(Self::new(config, pipeline, device, inventory, Arc::new(MonotonicClock::new())))
    }

    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    /// Run until a stop is requested or `inbound` closes, then shut down in order
    pub async fn run(self, inbound: mpsc::Receiver<InboundMessage>) -> RunSummary {
        self.log_reader_info().await;

        let aggregator = Arc::new(Mutex::new(BatchAggregator::new(
            to_time_delta(self.config.batch_window),
            self.config.logical_channel.clone(),
        )));
        let (outbox, outbox_rx) = Outbox::channel();
        let worker = tokio::spawn(delivery_worker(outbox_rx, self.pipeline.clone()));

        match self.inventory.start_inventory().await {
            Ok(()) => log::info!("📡 Inventory session started"),
            Err(e) => log::error!("❌ Failed to start inventory session: {}", e),
        }

        let relay = Arc::new(TagRelay::new(
            &self.config,
            aggregator.clone(),
            self.device.clone(),
            outbox.clone(),
        ));

        let ingestion = tokio::spawn(ingestion_task(
            relay,
            inbound,
            self.clock.clone(),
            self.lifecycle.subscribe(),
        ));
        let scheduler = tokio::spawn(flush_scheduler_task(
            aggregator.clone(),
            outbox.clone(),
            self.clock.clone(),
            self.config.flush_check_interval,
            self.lifecycle.subscribe(),
        ));

        let messages = match ingestion.await {
            Ok(count) => count,
            Err(e) => {
                log::error!("❌ Ingestion task failed: {}", e);
                0
            }
        };

        // Input closing on its own is also a stop
        if self.lifecycle.request_stop() {
            log::info!("⚠️  Reader input ended, shutting down...");
        }

        let scheduled_flushes = match scheduler.await {
            Ok(count) => count,
            Err(e) => {
                log::error!("❌ Flush scheduler failed: {}", e);
                0
            }
        };

        match self.inventory.stop_inventory().await {
            Ok(()) => log::info!("📡 Inventory session stopped"),
            Err(e) => log::error!("❌ Failed to stop inventory session: {}", e),
        }

        let remaining = {
            let mut guard = aggregator.lock().unwrap_or_else(|e| e.into_inner());
            guard.flush()
        };
        let final_flush = remaining.is_some();
        if let Some(record) = remaining {
            log::info!("🧹 Final flush: {} tags", record.id_hex.len());
            outbox.send(record);
        }

        // Closing the last outbox lets the worker drain and exit
        drop(outbox);
        let batches_delivered = match worker.await {
            Ok(count) => count,
            Err(e) => {
                log::error!("❌ Delivery worker failed: {}", e);
                0
            }
        };

        self.lifecycle.mark_stopped();
        log::info!(
            "✅ Relay stopped ({} messages, {} batches delivered)",
            messages,
            batches_delivered
        );

        RunSummary {
            messages,
            scheduled_flushes,
            final_flush,
            batches_delivered,
        }
    }

    async fn log_reader_info(&self) {
        match self.inventory.reader_version().await {
            Ok(version) => log::info!("   ├─ Reader version: {}", version),
            Err(e) => log::warn!("⚠️  Could not read reader version: {}", e),
        }
        match self.inventory.reader_serial().await {
            Ok(serial) => log::info!("   ├─ Reader serial: {}", serial),
            Err(e) => log::warn!("⚠️  Could not read reader serial: {}", e),
        }
        log::info!(
            "   └─ Script version: {}",
            self.config.script_version.as_deref().unwrap_or("unknown")
        );
    }
}
