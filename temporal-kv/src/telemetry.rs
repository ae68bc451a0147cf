//! Ambient telemetry.
//!
//! Logging is emitted directly via `tracing` spans/events at the call
//! sites that need it. Metrics stay a small pluggable trait so
//! applications can wire the map into whatever backend they already use,
//! without this crate depending on one.

use std::sync::Arc;

/// Counters and gauges this crate emits. Application code implements this
/// to wire the map into its own metrics backend; [`NopMetrics`] is the
/// default for callers who don't need them.
pub trait Metrics: Send + Sync {
    fn record_count(&self, name: &str, value: i64);
    fn record_gauge(&self, name: &str, value: f64);
}

/// Discards every measurement. The default collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopMetrics;

impl Metrics for NopMetrics {
    fn record_count(&self, _name: &str, _value: i64) {}
    fn record_gauge(&self, _name: &str, _value: f64) {}
}

pub fn nop() -> Arc<dyn Metrics> {
    Arc::new(NopMetrics)
}
