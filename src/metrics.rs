//! Metric emission for the message writer.
//!
//! Metrics flow through an injectable sink so deployments can bridge to
//! their telemetry system and tests can capture emissions. The default
//! sink logs structured events via tracing.

use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricValue {
    Counter(u64),
    /// Duration observation in nanoseconds, clamped at zero.
    DurationNanos(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricLabel {
    pub key: &'static str,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: &'static str,
    pub value: MetricValue,
    pub labels: Vec<MetricLabel>,
}

pub trait MetricSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Default sink: structured tracing events under the `metrics` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&self, event: MetricEvent) {
        match event.value {
            MetricValue::Counter(value) => {
                tracing::info!(
                    target: "metrics",
                    metric = event.name,
                    value,
                    labels = ?event.labels
                );
            }
            MetricValue::DurationNanos(nanos) => {
                tracing::info!(
                    target: "metrics",
                    metric = event.name,
                    nanos,
                    labels = ?event.labels
                );
            }
        }
    }
}

/// Per-writer metrics bundle.
///
/// The bundle is immutable; when the downstream consumer identity changes
/// the writer swaps in a re-scoped copy through its atomic metrics
/// pointer. Every emission carries the consumer label unless the bundle
/// was built without consumer scoping.
#[derive(Clone)]
pub struct WriterMetrics {
    sink: Arc<dyn MetricSink>,
    consumer: Option<String>,
}

impl WriterMetrics {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        Self {
            sink,
            consumer: Some("unknown".to_string()),
        }
    }

    /// A bundle that never tags the consumer, for deployments where the
    /// label would explode cardinality.
    pub fn without_consumer_scope(sink: Arc<dyn MetricSink>) -> Self {
        Self {
            sink,
            consumer: None,
        }
    }

    /// Re-scope the bundle to a consumer identity. No-op when built
    /// without consumer scoping.
    pub fn with_consumer(&self, consumer: &str) -> Self {
        match &self.consumer {
            Some(_) => Self {
                sink: Arc::clone(&self.sink),
                consumer: Some(consumer.to_string()),
            },
            None => self.clone(),
        }
    }

    fn labels(&self, extra: Option<MetricLabel>) -> Vec<MetricLabel> {
        let mut labels = Vec::with_capacity(2);
        if let Some(consumer) = &self.consumer {
            labels.push(MetricLabel {
                key: "consumer",
                value: consumer.clone(),
            });
        }
        if let Some(extra) = extra {
            labels.push(extra);
        }
        labels
    }

    fn counter(&self, name: &'static str, n: u64, extra: Option<MetricLabel>) {
        self.sink.record(MetricEvent {
            name,
            value: MetricValue::Counter(n),
            labels: self.labels(extra),
        });
    }

    fn duration(&self, name: &'static str, nanos: i64) {
        self.sink.record(MetricEvent {
            name,
            value: MetricValue::DurationNanos(u64::try_from(nanos).unwrap_or(0)),
            labels: self.labels(None),
        });
    }

    fn tag(key: &'static str, value: &'static str) -> Option<MetricLabel> {
        Some(MetricLabel {
            key,
            value: value.to_string(),
        })
    }

    pub(crate) fn write_success(&self, n: u64) {
        self.counter("write-success", n, None);
    }

    pub(crate) fn write_error_all_consumers(&self, n: u64) {
        self.counter("write-error", n, Self::tag("error-type", "all-consumers"));
    }

    pub(crate) fn write_error_no_writers(&self, n: u64) {
        self.counter("write-error", n, Self::tag("error-type", "no-writers"));
    }

    pub(crate) fn invalid_write(&self, reason: &'static str) {
        self.counter("invalid-write", 1, Self::tag("reason", reason));
    }

    pub(crate) fn message_acked(&self, n: u64) {
        self.counter("message-acked", n, None);
    }

    pub(crate) fn message_closed(&self, n: u64) {
        self.counter("message-closed", n, None);
    }

    pub(crate) fn message_dropped(&self, reason: &'static str, n: u64) {
        self.counter("message-dropped", n, Self::tag("reason", reason));
    }

    pub(crate) fn message_retry(&self, n: u64) {
        self.counter("message-retry", n, None);
    }

    pub(crate) fn message_consume_latency(&self, nanos: i64) {
        self.duration("message-consume-latency", nanos);
    }

    pub(crate) fn message_write_delay(&self, nanos: i64) {
        self.duration("message-write-delay", nanos);
    }

    pub(crate) fn scan_batch_latency(&self, nanos: i64) {
        self.duration("scan-batch-latency", nanos);
    }

    pub(crate) fn scan_total_latency(&self, nanos: i64) {
        self.duration("scan-total-latency", nanos);
    }

    pub(crate) fn write_success_latency(&self, nanos: i64) {
        self.duration("write-success-latency", nanos);
    }

    pub(crate) fn write_error_latency(&self, nanos: i64) {
        self.duration("write-error-latency", nanos);
    }

    pub(crate) fn message_enqueue(&self, n: u64) {
        self.counter("message-enqueue", n, None);
    }

    pub(crate) fn message_dequeue(&self, n: u64) {
        self.counter("message-dequeue", n, None);
    }

    pub(crate) fn message_processed(&self, result: &'static str, n: u64) {
        self.counter("message-processed", n, Self::tag("result", result));
    }

    pub(crate) fn forced_flush(&self) {
        self.counter("forced-flush", 1, None);
    }

    pub(crate) fn forced_flush_timeout(&self) {
        self.counter("forced-flush-timeout", 1, None);
    }

    pub(crate) fn forced_flush_failed_one(&self) {
        self.counter("forced-flush-failed-one", 1, None);
    }

    pub(crate) fn forced_flush_failed_all(&self) {
        self.counter("forced-flush-failed-all", 1, None);
    }

    pub(crate) fn forced_flush_latency(&self, nanos: i64) {
        self.duration("forced-flush-latency", nanos);
    }

    pub(crate) fn forced_flush_single_consumer(&self) {
        self.counter("forced-flush-single-consumer", 1, None);
    }

    pub(crate) fn forced_flush_not_enough_buffer(&self) {
        self.counter("forced-flush-not-enough-buffer", 1, None);
    }
}

impl Default for WriterMetrics {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}
