//! Top-level error for wiring the relay together

use crate::config::ConfigError;
use crate::delivery::SinkError;
use crate::device::{DeviceError, InventoryError};

/// Anything that can stop the relay before it starts running
///
/// Once running, per-event and per-delivery errors are logged and never
/// surface here.
#[derive(Debug)]
pub enum RelayError {
    Config(ConfigError),
    Sink(SinkError),
    Inventory(InventoryError),
    Device(DeviceError),
    Io(std::io::Error),
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}

impl From<SinkError> for RelayError {
    fn from(err: SinkError) -> Self {
        RelayError::Sink(err)
    }
}

impl From<InventoryError> for RelayError {
    fn from(err: InventoryError) -> Self {
        RelayError::Inventory(err)
    }
}

impl From<DeviceError> for RelayError {
    fn from(err: DeviceError) -> Self {
        RelayError::Device(err)
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err)
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Config(e) => write!(f, "Configuration error: {}", e),
            RelayError::Sink(e) => write!(f, "Sink setup error: {}", e),
            RelayError::Inventory(e) => write!(f, "Reader API error: {}", e),
            RelayError::Device(e) => write!(f, "Device error: {}", e),
            RelayError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}
