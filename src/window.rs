//! Idle-gap batch window for batched tag reads
//!
//! A single window is live at a time. It opens on the first admitted read,
//! collects unique identifiers in arrival order, and closes once no read has
//! been admitted for longer than the window threshold.

use crate::delivery::DeliveryRecord;
use crate::event::TagEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct BatchWindow {
    pub reader_id: String,
    pub logical_channel: String,
    pub timestamp: String,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    id_hex: Vec<String>,
    seen: HashSet<String>,
}

impl BatchWindow {
    fn open(event: &TagEvent, logical_channel: &str, timestamp: &str, now: DateTime<Utc>) -> Self {
        Self {
            reader_id: event.host_name.clone(),
            logical_channel: logical_channel.to_string(),
            timestamp: timestamp.to_string(),
            opened_at: now,
            last_activity_at: now,
            id_hex: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns true if `id_hex` was not yet in the window
    fn insert(&mut self, id_hex: &str) -> bool {
        if self.seen.insert(id_hex.to_string()) {
            self.id_hex.push(id_hex.to_string());
            true
        } else {
            false
        }
    }

    pub fn identifiers(&self) -> &[String] {
        &self.id_hex
    }

    pub fn is_empty(&self) -> bool {
        self.id_hex.is_empty()
    }

    fn is_idle(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now - self.last_activity_at > threshold
    }

    fn into_record(self) -> DeliveryRecord {
        DeliveryRecord {
            reader_id: self.reader_id,
            antenna: self.logical_channel,
            id_hex: self.id_hex,
            timestamp: self.timestamp,
        }
    }
}

/// Result of admitting one read
#[derive(Debug)]
pub struct Admission {
    /// Window closed by this read, to be delivered by the caller
    pub flushed: Option<DeliveryRecord>,
    /// False when the identifier was already in the live window
    pub inserted: bool,
}

/// Owner of the live [`BatchWindow`]
///
/// Not synchronized itself: callers share it behind a mutex and deliver the
/// returned records after releasing the lock.
pub struct BatchAggregator {
    threshold: Duration,
    logical_channel: String,
    window: Option<BatchWindow>,
}

impl BatchAggregator {
    pub fn new(threshold: Duration, logical_channel: impl Into<String>) -> Self {
        Self {
            threshold,
            logical_channel: logical_channel.into(),
            window: None,
        }
    }

    /// Add a batched read
    ///
    /// When no window is live, or the live one has been idle past the
    /// threshold, the old window is flushed first and a new one is opened
    /// with this event's host and timestamp.
    pub fn admit(&mut self, event: &TagEvent, timestamp: &str, now: DateTime<Utc>) -> Admission {
        let needs_new_window = match &self.window {
            None => true,
            Some(window) => window.is_empty() || window.is_idle(now, self.threshold),
        };

        let mut flushed = None;
        if needs_new_window {
            flushed = self.flush();
            self.window = None;
        }

        let window = self
            .window
            .get_or_insert_with(|| BatchWindow::open(event, &self.logical_channel, timestamp, now));
        let inserted = window.insert(&event.id_hex);
        window.last_activity_at = now;

        Admission { flushed, inserted }
    }

    /// Close the live window and return its record
    ///
    /// An empty or absent window yields `None` and leaves state untouched.
    pub fn flush(&mut self) -> Option<DeliveryRecord> {
        match &self.window {
            Some(window) if !window.is_empty() => self.window.take().map(BatchWindow::into_record),
            _ => None,
        }
    }

    /// Flush only if the live window has been idle longer than the threshold
    pub fn flush_if_idle(&mut self, now: DateTime<Utc>) -> Option<DeliveryRecord> {
        match &self.window {
            Some(window) if window.is_idle(now, self.threshold) => self.flush(),
            _ => None,
        }
    }

    pub fn live_window(&self) -> Option<&BatchWindow> {
        self.window.as_ref()
    }
}
