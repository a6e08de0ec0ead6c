//! Tag event normalization from raw reader messages
//!
//! The reader delivers JSON messages shaped like
//! `{"data": {"idHex": "E200...", "antenna": 3, "hostName": "FX9600-1"}}`.
//! Everything outside `data` is ignored.

use crate::clock::format_reader_timestamp;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::ops::RangeInclusive;

/// A single tag read, immutable once normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEvent {
    pub id_hex: String,
    pub antenna: i64,
    pub host_name: String,
    pub observed_at: DateTime<Utc>,
}

/// Output of the normalizer: the event plus its reader-formatted timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub event: TagEvent,
    pub timestamp: String,
}

#[derive(Debug)]
pub enum EventError {
    /// Payload is not well-formed JSON, or a field has an unusable type
    Malformed(String),
    /// `data.idHex` is absent or empty
    MissingIdentifier,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::Malformed(msg) => write!(f, "Malformed event: {}", msg),
            EventError::MissingIdentifier => write!(f, "No idHex found in data"),
        }
    }
}

impl std::error::Error for EventError {}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Malformed(err.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    #[serde(rename = "idHex", default)]
    id_hex: Option<String>,
    #[serde(default)]
    antenna: Option<Value>,
    #[serde(rename = "hostName", default)]
    host_name: Option<String>,
}

/// Parse a raw reader message into a [`NormalizedEvent`]
///
/// `observed_at` is the instant the message was received; its timestamp string
/// is rendered at `offset`.
pub fn normalize(
    raw: &[u8],
    observed_at: DateTime<Utc>,
    offset: &FixedOffset,
) -> Result<NormalizedEvent, EventError> {
    let message: RawMessage = serde_json::from_slice(raw)?;
    let data = message.data.unwrap_or_default();

    let id_hex = data.id_hex.unwrap_or_default();
    if id_hex.is_empty() {
        return Err(EventError::MissingIdentifier);
    }

    let antenna = match data.antenna {
        Some(value) => parse_antenna(&value)?,
        None => 0,
    };

    Ok(NormalizedEvent {
        event: TagEvent {
            id_hex,
            antenna,
            host_name: data.host_name.unwrap_or_default(),
            observed_at,
        },
        timestamp: format_reader_timestamp(observed_at, offset),
    })
}

/// Readers report the antenna as a number, but some firmware sends it as a string
fn parse_antenna(value: &Value) -> Result<i64, EventError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| EventError::Malformed(format!("antenna out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| EventError::Malformed(format!("antenna is not an integer: {:?}", s))),
        Value::Null => Ok(0),
        other => Err(EventError::Malformed(format!("antenna has unexpected type: {}", other))),
    }
}

/// Where an event goes after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRoute {
    /// Single-event output guarded by the cooldown filter
    Keyboard,
    /// Windowed batch aggregation
    Batch,
    /// Channel-group outside every configured route
    Unrouted,
}

/// Channel-group classification rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRules {
    pub keyboard_antenna: i64,
    pub batch_antennas: RangeInclusive<i64>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            keyboard_antenna: 8,
            batch_antennas: 1..=7,
        }
    }
}

impl RoutingRules {
    pub fn classify(&self, antenna: i64) -> ChannelRoute {
        if antenna == self.keyboard_antenna {
            ChannelRoute::Keyboard
        } else if self.batch_antennas.contains(&antenna) {
            ChannelRoute::Batch
        } else {
            ChannelRoute::Unrouted
        }
    }
}
