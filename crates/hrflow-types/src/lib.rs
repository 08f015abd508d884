//! Shared domain types for hrflow.
//!
//! This crate contains the domain types used across the workflow engine:
//! definitions (the process graph), instances, approval records, predicates,
//! notification deliveries, events, configuration, and the repository error.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod instance;
pub mod notification;
pub mod predicate;

/// Identifier of a human actor (employee, manager, HR officer).
pub type ActorId = String;

/// Identifier of a node, unique within one workflow definition.
pub type NodeId = String;
