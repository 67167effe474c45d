//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - laneflow_items_pushed_total: Items admitted to a flow buffer
//! - laneflow_items_rejected_total: Items refused, by `reason`
//! - laneflow_items_exported_total: Items forwarded to an output stream
//! - laneflow_lane_rotations_total: Dispatcher moves to a fresh lane
//! - laneflow_handler_panics_total: Handler invocations that panicked
//!
//! Instruments come from the global meter provider, so exporting is up to
//! the application. Recording is a no-op until [`init_metrics`] is called.

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Laneflow metrics registry.
#[derive(Debug)]
pub struct Metrics {
    pub items_pushed: Counter<u64>,
    pub items_rejected: Counter<u64>,
    pub items_exported: Counter<u64>,
    pub lane_rotations: Counter<u64>,
    pub handler_panics: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            items_pushed: meter
                .u64_counter("laneflow_items_pushed_total")
                .with_description("Items admitted to a flow inbound buffer")
                .with_unit("1")
                .init(),
            items_rejected: meter
                .u64_counter("laneflow_items_rejected_total")
                .with_description("Items refused by push or handed back at close")
                .with_unit("1")
                .init(),
            items_exported: meter
                .u64_counter("laneflow_items_exported_total")
                .with_description("Handler results forwarded to an output stream")
                .with_unit("1")
                .init(),
            lane_rotations: meter
                .u64_counter("laneflow_lane_rotations_total")
                .with_description("Times the dispatcher rotated away from a full lane")
                .with_unit("1")
                .init(),
            handler_panics: meter
                .u64_counter("laneflow_handler_panics_total")
                .with_description("Handler invocations that panicked")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics instruments from the global meter provider.
///
/// Install a provider first to export them. Subsequent calls are ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| Metrics::new(&global::meter("laneflow")));
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn record_pushed() {
    if let Some(m) = METRICS.get() {
        m.items_pushed.add(1, &[]);
    }
}

/// Record a refused item. `reason` is `buffer_full`, `lanes_exhausted`, `closed` or `cutover`.
pub fn record_rejected(reason: &'static str) {
    if let Some(m) = METRICS.get() {
        m.items_rejected.add(1, &[KeyValue::new("reason", reason)]);
    }
}

pub fn record_exported() {
    if let Some(m) = METRICS.get() {
        m.items_exported.add(1, &[]);
    }
}

pub fn record_lane_rotation() {
    if let Some(m) = METRICS.get() {
        m.lane_rotations.add(1, &[]);
    }
}

pub fn record_handler_panic(lane_id: usize) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("lane", lane_id as i64)];
        m.handler_panics.add(1, &attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_record_helpers() {
        init_metrics();
        // Should not panic
        record_pushed();
        record_rejected("buffer_full");
        record_exported();
        record_lane_rotation();
        record_handler_panic(3);
    }
}
