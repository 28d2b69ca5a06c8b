//! Observability for Atomflow: tracing subscriber setup with optional
//! OpenTelemetry export.

pub mod tracing_setup;
