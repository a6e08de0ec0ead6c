//! Console logging with optional forwarding to a remote syslog collector
//!
//! `env_logger` decides what is enabled and prints to stderr. When a syslog
//! server is configured, every enabled record is also sent over UDP in
//! RFC 3164 format.

use crate::config::LoggingConfig;
use log::{Level, Log, Metadata, Record, SetLoggerError};
use std::sync::Mutex;
use syslog::{Facility, Formatter3164, LoggerBackend};

type SyslogWriter = syslog::Logger<LoggerBackend, Formatter3164>;

pub struct RelayLogger {
    console: env_logger::Logger,
    syslog: Option<Mutex<SyslogWriter>>,
}

impl RelayLogger {
    pub fn new(console: env_logger::Logger, syslog: Option<SyslogWriter>) -> Self {
        Self {
            console,
            syslog: syslog.map(Mutex::new),
        }
    }

    fn forward(&self, record: &Record) {
        let Some(syslog) = &self.syslog else {
            return;
        };
        let mut writer = syslog.lock().unwrap_or_else(|e| e.into_inner());
        let message = format!("[{}] {}", record.target(), record.args());

        // Nowhere to report a failed send from inside the logger
        let _ = match record.level() {
            Level::Error => writer.err(message),
            Level::Warn => writer.warning(message),
            Level::Info => writer.info(message),
            Level::Debug | Level::Trace => writer.debug(message),
        };
    }
}

impl Log for RelayLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        self.forward(record);
    }

    fn flush(&self) {
        self.console.flush();
    }
}

/// UDP syslog writer for `target` (`host:port`)
pub fn connect_syslog(target: &str) -> Result<SyslogWriter, String> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "tagrelay".to_string(),
        pid: std::process::id(),
    };

    syslog::udp(formatter, "0.0.0.0:0", target).map_err(|e| e.to_string())
}

/// Install the global logger
///
/// An unreachable syslog server is reported once and logging stays local.
pub fn init(config: &LoggingConfig) -> Result<(), SetLoggerError> {
    let console = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .build();
    let max_level = console.filter();

    let target = config.syslog_target();
    let (syslog, syslog_error) = match target.as_deref().map(connect_syslog) {
        Some(Ok(writer)) => (Some(writer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    log::set_boxed_logger(Box::new(RelayLogger::new(console, syslog)))?;
    log::set_max_level(max_level);

    match (target, syslog_error) {
        (Some(target), None) => log::info!("📝 Forwarding logs to syslog at {}", target),
        (Some(target), Some(e)) => log::warn!("⚠️  Syslog at {} unavailable, logging to console only: {}", target, e),
        (None, _) => log::debug!("Logging to console only"),
    }
    Ok(())
}
