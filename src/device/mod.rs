//! Reader hardware and inventory-session collaborators
//!
//! The relay never talks to the radio directly. Inbound reads arrive as
//! [`InboundMessage`]s on a channel, keyboard output goes through
//! [`ReaderDevice`], and session control through
//! [`inventory::InventoryControl`].

pub mod backoff;
pub mod inventory;
pub mod stdio;

use async_trait::async_trait;

pub use inventory::{DetachedInventory, InventoryControl, InventoryError, RestInventoryClient};
pub use stdio::StdioDevice;

/// Message type reported by the reader alongside each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Json,
    Text,
    Other,
}

/// One "data" message from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn json(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Json,
            payload: payload.into(),
        }
    }
}

#[derive(Debug)]
pub enum DeviceError {
    Io(std::io::Error),
    Closed,
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err)
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Io(e) => write!(f, "IO error: {}", e),
            DeviceError::Closed => write!(f, "Device output closed"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Single-event output of the reader (keyboard wedge emulation)
#[async_trait]
pub trait ReaderDevice: Send + Sync {
    async fn send_output(&self, data: &[u8]) -> Result<(), DeviceError>;
}
