//! Tag relay runtime
//!
//! Reads reader data messages (one JSON document per line) from stdin,
//! writes keyboard-antenna tags to stdout and delivers batched reads to the
//! monitoring and business endpoints.
//!
//! Usage:
//!   reader-stream | tagrelay
//!
//! See `RelayConfig::from_env` for the environment variables.

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tagrelay::config::LoggingConfig;
use tagrelay::device::{InboundMessage, StdioDevice};
use tagrelay::logging;
use tagrelay::{LifecycleHandle, RelayConfig, RelayRuntime};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    // A bad logging variable is reported by the full config load below
    let log_config = LoggingConfig::from_env().unwrap_or_default();
    logging::init(&log_config)?;

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    info!("🚀 Tag relay starting");
    info!("   ├─ Monitor: {}{} ({}ms)", config.monitor.base_url, config.monitor.path, config.monitor.timeout.as_millis());
    info!("   ├─ Business: {}{} ({}ms)", config.business.base_url, config.business.path, config.business.timeout.as_millis());
    info!("   ├─ Keyboard antenna: {} (cooldown {}ms)", config.routing.keyboard_antenna, config.keyboard_cooldown.as_millis());
    info!(
        "   ├─ Batch antennas: {}..={} (window {}ms, check every {}ms)",
        config.routing.batch_antennas.start(),
        config.routing.batch_antennas.end(),
        config.batch_window.as_millis(),
        config.flush_check_interval.as_millis()
    );
    info!("   ├─ Logical channel: {}", config.logical_channel);
    info!("   ├─ Reader UTC offset: {}", config.utc_offset);
    info!("   ├─ Reader API: {}", config.reader_api_url.as_deref().unwrap_or("detached"));
    info!("   ├─ Syslog: {}", config.logging.syslog_target().as_deref().unwrap_or("disabled"));
    info!("   └─ Log filter: {}", config.logging.rust_log);

    let (tx, rx) = mpsc::channel::<InboundMessage>(config.inbound_buffer);
    let device = Arc::new(StdioDevice::stdout());
    let runtime = RelayRuntime::from_config(config, device)?;

    // Not joined: the thread may sit in a blocking stdin read at shutdown
    let _reader = StdioDevice::spawn_stdin_reader(tx)?;

    let lifecycle = runtime.lifecycle();
    tokio::spawn(watch_signals(lifecycle));

    info!("🔄 Press CTRL+C to shutdown gracefully");
    let summary = runtime.run(rx).await;

    info!("✅ Tag relay stopped");
    info!("   ├─ Messages: {}", summary.messages);
    info!("   ├─ Scheduled flushes: {}", summary.scheduled_flushes);
    info!("   ├─ Final flush: {}", if summary.final_flush { "yes" } else { "empty" });
    info!("   └─ Batches delivered: {}", summary.batches_delivered);
    Ok(())
}

/// Turn SIGINT or SIGTERM into a stop request
async fn watch_signals(lifecycle: LifecycleHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                wait_ctrl_c().await;
                lifecycle.request_stop();
                return;
            }
        };

        tokio::select! {
            _ = wait_ctrl_c() => info!("⚠️  Received CTRL+C, shutting down..."),
            _ = sigterm.recv() => info!("⚠️  Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        wait_ctrl_c().await;
        info!("⚠️  Received CTRL+C, shutting down...");
    }

    lifecycle.request_stop();
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
