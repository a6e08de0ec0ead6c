//! Per-identifier cooldown for the single-event (keyboard) output

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Suppresses repeats of an identifier within `cooldown` of its last accepted send
///
/// Entries are overwritten on every accepted send and never evicted.
pub struct CooldownFilter {
    cooldown: Duration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl CooldownFilter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    /// Returns true and records `now` when `id_hex` may be sent
    ///
    /// The interval is measured from the last accepted send, so a tag held in
    /// front of the antenna is re-sent once per cooldown period.
    pub fn should_send(&mut self, id_hex: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_sent.get(id_hex) {
            if now - *last < self.cooldown {
                return false;
            }
        }

        self.last_sent.insert(id_hex.to_string(), now);
        true
    }

    /// Number of identifiers ever accepted
    pub fn tracked(&self) -> usize {
        self.last_sent.len()
    }
}
