//! Delivery of flushed batches to the monitoring and business endpoints

pub mod pipeline;
pub mod record;
pub mod sink;

pub use pipeline::{delivery_worker, DeliveryOutcome, DeliveryPipeline, Outbox};
pub use record::{ApiResult, ApiResultEnvelope, DeliveryRecord};
pub use sink::{HttpSink, Sink, SinkError, SinkResponse};
