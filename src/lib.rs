//! RFID tag-read relay
//!
//! Reads from the keyboard antenna are forwarded one by one as keyboard
//! output, throttled per tag. Reads from the batch antennas are grouped into
//! idle-gap windows and delivered to a monitoring endpoint and a business
//! endpoint when a window closes.

pub mod clock;
pub mod config;
pub mod cooldown;
pub mod delivery;
pub mod device;
pub mod error;
pub mod event;
pub mod logging;
pub mod relay;
pub mod window;

pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::{LifecycleHandle, LifecycleState, RelayRuntime, RunSummary};
