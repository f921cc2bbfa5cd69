#![forbid(unsafe_code)]

//! Per-shard reliable message writer.
//!
//! Sits between a producer of shard-keyed messages and a replicated set
//! of downstream consumer connections: delivers each message
//! at-least-once to one healthy replica, retries with backoff until
//! acknowledged, drops messages whose TTL elapses, and keeps per-shard
//! FIFO order for first attempts while tolerating out-of-order retries.

pub mod clock;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod message;
pub mod metrics;
pub mod payload;
pub mod retry;
pub mod writer;

mod acks;
mod queue;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use codec::{FRAME_HEADER_LEN, FrameEncoder, FrameError, decode_frame, decode_message};
pub use config::{ConfigError, RetryConfig, WriterConfig};
pub use consumer::ConsumerWriter;
pub use message::{Message, MessagePool, Metadata};
pub use metrics::{
    MetricEvent, MetricLabel, MetricSink, MetricValue, TracingSink, WriterMetrics,
};
pub use payload::SharedPayload;
pub use retry::{RetryError, RetryPolicy};
pub use writer::MessageWriter;
