//! Periodic idle-window flush
//!
//! A window closes on the next admitted read after the idle gap, but with no
//! further reads it would sit open forever. The scheduler checks once per
//! tick and hands idle windows to the outbox.

use super::lifecycle::LifecycleState;
use crate::clock::Clock;
use crate::delivery::{DeliveryRecord, Outbox};
use crate::window::BatchAggregator;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Flush the live window if it has been idle past the threshold
pub fn check_idle_window(aggregator: &Mutex<BatchAggregator>, now: DateTime<Utc>) -> Option<DeliveryRecord> {
    let mut guard = aggregator.lock().unwrap_or_else(|e| e.into_inner());
    guard.flush_if_idle(now)
}

/// Flush scheduler task: one idle check per `check_interval` until the lifecycle leaves `Running`
///
/// Returns the number of windows flushed by the scheduler.
pub async fn flush_scheduler_task(
    aggregator: Arc<Mutex<BatchAggregator>>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    mut lifecycle: watch::Receiver<LifecycleState>,
) -> u64 {
    log::info!("⏰ Starting flush scheduler (interval: {}ms)", check_interval.as_millis());

    let mut timer = interval(check_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flushed = 0u64;

    loop {
        if *lifecycle.borrow_and_update() != LifecycleState::Running {
            break;
        }

        tokio::select! {
            biased;

            changed = lifecycle.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            _ = timer.tick() => {
                if let Some(record) = check_idle_window(&aggregator, clock.now()) {
                    log::debug!("⏰ Idle window flushed by scheduler ({} tags)", record.id_hex.len());
                    outbox.send(record);
                    flushed += 1;
                }
            }
        }
    }

    log::info!("✅ Flush scheduler stopped ({} idle flushes)", flushed);
    flushed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::TagEvent;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs)
    }

    fn event(id_hex: &str, at: DateTime<Utc>) -> TagEvent {
        TagEvent {
            id_hex: id_hex.to_string(),
            antenna: 3,
            host_name: "reader-1".to_string(),
            observed_at: at,
        }
    }

    fn aggregator_with(ids: &[&str], at: DateTime<Utc>) -> Arc<Mutex<BatchAggregator>> {
        let mut aggregator = BatchAggregator::new(chrono::Duration::seconds(5), "1");
        for id in ids {
            aggregator.admit(&event(id, at), "ts", at);
        }
        Arc::new(Mutex::new(aggregator))
    }

    #[test]
    fn test_check_idle_window_respects_threshold() {
        let aggregator = aggregator_with(&["A"], t(0));

        assert!(check_idle_window(&aggregator, t(5)).is_none());
        let record = check_idle_window(&aggregator, t(6)).unwrap();
        assert_eq!(record.id_hex, vec!["A"]);
        assert!(aggregator.lock().unwrap().live_window().is_none());

        // Nothing left to flush
        assert!(check_idle_window(&aggregator, t(20)).is_none());
    }

    #[test]
    fn test_concurrent_admit_and_flush_lose_nothing() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 2000;

        let aggregator = Arc::new(Mutex::new(BatchAggregator::new(chrono::Duration::seconds(5), "1")));
        let delivered = Arc::new(Mutex::new(Vec::<String>::new()));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let aggregator = aggregator.clone();
                let delivered = delivered.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        let id = format!("{}-{}", w, i);
                        let now = t(0) + chrono::Duration::milliseconds(i as i64);
                        let admission = aggregator.lock().unwrap().admit(&event(&id, now), "ts", now);
                        assert!(admission.inserted);
                        if let Some(record) = admission.flushed {
                            delivered.lock().unwrap().extend(record.id_hex);
                        }
                    }
                })
            })
            .collect();

        let flusher = {
            let aggregator = aggregator.clone();
            let delivered = delivered.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    if let Some(record) = check_idle_window(&aggregator, t(1_000)) {
                        delivered.lock().unwrap().extend(record.id_hex);
                    }
                    std::thread::yield_now();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::Release);
        flusher.join().unwrap();

        if let Some(record) = aggregator.lock().unwrap().flush() {
            delivered.lock().unwrap().extend(record.id_hex);
        }

        let mut delivered = delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), WRITERS * PER_WRITER);
        delivered.sort();
        delivered.dedup();
        assert_eq!(delivered.len(), WRITERS * PER_WRITER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_flushes_idle_window() {
        let aggregator = aggregator_with(&["A", "B"], t(0));
        let (outbox, mut rx) = Outbox::channel();
        let clock = Arc::new(ManualClock::at_epoch());
        let (state_tx, state_rx) = watch::channel(LifecycleState::Running);

        let handle = tokio::spawn(flush_scheduler_task(
            aggregator.clone(),
            outbox,
            clock.clone(),
            Duration::from_secs(1),
            state_rx,
        ));

        clock.set(t(3));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_err());

        clock.set(t(6));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let record = rx.try_recv().unwrap();
        assert_eq!(record.id_hex, vec!["A", "B"]);

        state_tx.send(LifecycleState::Stopping).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_empty_window_sends_nothing() {
        let aggregator = Arc::new(Mutex::new(BatchAggregator::new(chrono::Duration::seconds(5), "1")));
        let (outbox, mut rx) = Outbox::channel();
        let clock = Arc::new(ManualClock::new(t(100)));
        let (state_tx, state_rx) = watch::channel(LifecycleState::Running);

        let handle = tokio::spawn(flush_scheduler_task(aggregator, outbox, clock, Duration::from_secs(1), state_rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        state_tx.send(LifecycleState::Stopping).unwrap();

        assert_eq!(handle.await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }
}
