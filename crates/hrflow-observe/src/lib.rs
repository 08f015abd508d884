//! Observability setup for hrflow: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
