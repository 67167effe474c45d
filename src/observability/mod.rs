//! Observability infrastructure.
//!
//! Provides:
//! - OpenTelemetry counters for push, export, rotation and handler panics
//! - Structured tracing setup for binaries and tests

pub mod metrics;
pub mod tracing;
