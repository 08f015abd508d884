//! Workflow engine core.
//!
//! - `definition` -- YAML/JSON parsing, structural validation, file loading
//! - `graph` -- petgraph model of a definition: start node, reachability, cycles
//! - `condition` -- predicate evaluation over instance variables
//! - `aggregator` -- approval quorum resolution
//! - `executor` -- per-node-kind dispatch producing effects and next nodes
//! - `transition` -- frontier expansion planned from one instance snapshot
//! - `retry` -- backoff policy for notification deliveries
//! - `dispatch` -- outbox delivery with retry and dead-lettering
//! - `engine` -- the facade: definitions, instances, approvals, cancellation

pub mod aggregator;
pub mod condition;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod retry;
pub mod transition;
