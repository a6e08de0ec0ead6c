//! Relay core: ingestion, idle-window scheduler and lifecycle

pub mod ingestion;
pub mod lifecycle;
pub mod scheduler;

pub use ingestion::{ingestion_task, Disposition, TagRelay};
pub use lifecycle::{LifecycleHandle, LifecycleState, RelayRuntime, RunSummary};
pub use scheduler::{check_idle_window, flush_scheduler_task};
