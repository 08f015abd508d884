//! Infrastructure layer for hrflow.
//!
//! Implements the ports defined in `hrflow-core`: SQLite repositories for
//! definitions, instances, approval records and the notification outbox,
//! the configuration loader, and notification sinks.

pub mod config;
pub mod sink;
pub mod sqlite;
