//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (hrflow-infra) implements. The core crate never depends on any specific
//! storage technology; `memory` provides in-process adapters used by tests
//! and single-process deployments.

pub mod memory;
pub mod outbox;
pub mod workflow;
