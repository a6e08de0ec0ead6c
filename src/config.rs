//! Relay configuration from environment variables
//!
//! Every value has a default matching the reader deployment. Values that are
//! set but unparsable are rejected instead of silently falling back.

use crate::clock::parse_utc_offset;
use crate::event::RoutingRules;
use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// An HTTP endpoint the relay posts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub path: String,
    pub timeout: Duration,
}

/// Console and remote syslog logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `env_logger` filter directive
    pub rust_log: String,
    /// Remote syslog host; `None` keeps logging local
    pub syslog_server: Option<String>,
    pub syslog_port: u16,
    /// Skip the syslog forwarder even when a server is configured
    pub log_only_to_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rust_log: "info".to_string(),
            syslog_server: None,
            syslog_port: 514,
            log_only_to_console: false,
        }
    }
}

impl LoggingConfig {
    /// Address of the syslog collector when forwarding is enabled
    pub fn syslog_target(&self) -> Option<String> {
        if self.log_only_to_console {
            return None;
        }
        self.syslog_server
            .as_ref()
            .map(|host| format!("{}:{}", host, self.syslog_port))
    }

    /// Read only the logging variables, so logging can start before full config validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            rust_log: env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            syslog_server: env::var("SYSLOG_SERVER")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            syslog_port: parsed("SYSLOG_PORT", defaults.syslog_port)?,
            log_only_to_console: flag("LOG_ONLY_TO_CONSOLE", defaults.log_only_to_console)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local monitoring endpoint (raw batches and api_result envelopes)
    pub monitor: EndpointConfig,
    /// Warehouse counting API
    pub business: EndpointConfig,

    /// Idle gap after which a batch window is flushed
    pub batch_window: Duration,
    /// Minimum spacing between keyboard sends of one tag
    pub keyboard_cooldown: Duration,
    /// Period of the idle-window check
    pub flush_check_interval: Duration,

    pub routing: RoutingRules,
    /// Label written into every batch instead of the physical antenna
    pub logical_channel: String,
    /// Offset used to render batch timestamps
    pub utc_offset: FixedOffset,

    /// Reader REST API base URL; `None` leaves session control to the operator
    pub reader_api_url: Option<String>,
    pub reader_api_retry_count: u32,

    pub inbound_buffer: usize,
    pub logging: LoggingConfig,
    /// Deployed script version, surfaced once at startup
    pub script_version: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            monitor: EndpointConfig {
                base_url: "http://192.168.1.25:5000".to_string(),
                path: "/rfid".to_string(),
                timeout: Duration::from_secs(2),
            },
            business: EndpointConfig {
                base_url: "http://product.suite.stechoq-j.com".to_string(),
                path: "/api/v1/warehouse-management/counting-log-rfid".to_string(),
                timeout: Duration::from_secs(5),
            },
            batch_window: Duration::from_secs(5),
            keyboard_cooldown: Duration::from_secs(3),
            flush_check_interval: Duration::from_secs(1),
            routing: RoutingRules::default(),
            logical_channel: "1".to_string(),
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix()),
            reader_api_url: None,
            reader_api_retry_count: 3,
            inbound_buffer: 1024,
            logging: LoggingConfig::default(),
            script_version: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `MONITOR_URL` / `MONITOR_PATH` / `MONITOR_TIMEOUT_MS`
    /// - `BUSINESS_URL` / `BUSINESS_PATH` / `BUSINESS_TIMEOUT_MS`
    /// - `BATCH_WINDOW_MS` (default: 5000)
    /// - `KEYBOARD_COOLDOWN_MS` (default: 3000)
    /// - `FLUSH_CHECK_INTERVAL_MS` (default: 1000)
    /// - `KEYBOARD_ANTENNA` (default: 8)
    /// - `BATCH_ANTENNA_MIN` / `BATCH_ANTENNA_MAX` (default: 1 / 7)
    /// - `LOGICAL_CHANNEL` (default: "1")
    /// - `READER_UTC_OFFSET` (default: +07:00)
    /// - `READER_API_URL` (optional), `READER_API_RETRY_COUNT` (default: 3)
    /// - `INBOUND_BUFFER` (default: 1024)
    /// - `RUST_LOG` (default: info)
    /// - `SYSLOG_SERVER` (optional), `SYSLOG_PORT` (default: 514), `LOG_ONLY_TO_CONSOLE` (default: false)
    /// - `VERSION` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let monitor = EndpointConfig {
            base_url: http_url("MONITOR_URL", defaults.monitor.base_url)?,
            path: env::var("MONITOR_PATH").unwrap_or(defaults.monitor.path),
            timeout: millis("MONITOR_TIMEOUT_MS", defaults.monitor.timeout)?,
        };

        let business = EndpointConfig {
            base_url: http_url("BUSINESS_URL", defaults.business.base_url)?,
            path: env::var("BUSINESS_PATH").unwrap_or(defaults.business.path),
            timeout: millis("BUSINESS_TIMEOUT_MS", defaults.business.timeout)?,
        };

        let batch_window = millis("BATCH_WINDOW_MS", defaults.batch_window)?;
        let keyboard_cooldown = millis("KEYBOARD_COOLDOWN_MS", defaults.keyboard_cooldown)?;
        let flush_check_interval = millis("FLUSH_CHECK_INTERVAL_MS", defaults.flush_check_interval)?;
        if flush_check_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "FLUSH_CHECK_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let keyboard_antenna = parsed("KEYBOARD_ANTENNA", defaults.routing.keyboard_antenna)?;
        let batch_min = parsed("BATCH_ANTENNA_MIN", *defaults.routing.batch_antennas.start())?;
        let batch_max = parsed("BATCH_ANTENNA_MAX", *defaults.routing.batch_antennas.end())?;
        if batch_min > batch_max {
            return Err(ConfigError::InvalidValue(format!(
                "BATCH_ANTENNA_MIN ({}) is greater than BATCH_ANTENNA_MAX ({})",
                batch_min, batch_max
            )));
        }
        if (batch_min..=batch_max).contains(&keyboard_antenna) {
            log::warn!(
                "KEYBOARD_ANTENNA {} lies inside the batch range {}..={}, keyboard routing wins",
                keyboard_antenna,
                batch_min,
                batch_max
            );
        }

        let utc_offset = match env::var("READER_UTC_OFFSET") {
            Ok(s) => parse_utc_offset(&s).ok_or_else(|| {
                ConfigError::InvalidValue(format!("READER_UTC_OFFSET must look like +07:00, got {:?}", s))
            })?,
            Err(_) => defaults.utc_offset,
        };

        let reader_api_url = match env::var("READER_API_URL") {
            Ok(url) if !url.trim().is_empty() => Some(http_url("READER_API_URL", url)?),
            _ => None,
        };

        let inbound_buffer = parsed("INBOUND_BUFFER", defaults.inbound_buffer)?;
        if inbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "INBOUND_BUFFER must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            monitor,
            business,
            batch_window,
            keyboard_cooldown,
            flush_check_interval,
            routing: RoutingRules {
                keyboard_antenna,
                batch_antennas: batch_min..=batch_max,
            },
            logical_channel: env::var("LOGICAL_CHANNEL").unwrap_or(defaults.logical_channel),
            utc_offset,
            reader_api_url,
            reader_api_retry_count: parsed("READER_API_RETRY_COUNT", defaults.reader_api_retry_count)?,
            inbound_buffer,
            logging: LoggingConfig::from_env()?,
            script_version: env::var("VERSION").ok(),
        })
    }
}

fn parsed<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} is not a valid number: {:?}", var, s))),
        Err(_) => Ok(default),
    }
}

fn flag(var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!("{} must be true or false, got {:?}", var, s))),
        },
        Err(_) => Ok(default),
    }
}

fn millis(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Ok(_) => parsed::<u64>(var, 0).map(Duration::from_millis),
        Err(_) => Ok(default),
    }
}

/// Value of `var` (or `default`), required to be an http(s) URL
fn http_url(var: &str, default: String) -> Result<String, ConfigError> {
    let url = env::var(var).unwrap_or(default);
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must start with http:// or https://",
            var
        )));
    }
    Ok(url)
}
