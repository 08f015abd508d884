//! Workflow engine logic and repository trait definitions for hrflow.
//!
//! This crate defines the "ports" (repository traits, notification sink) that
//! the infrastructure layer implements, plus everything that runs on top of
//! them: definition validation, condition evaluation, approval aggregation,
//! node execution, the instance state machine, notification dispatch, and the
//! `Engine` facade. It depends only on `hrflow-types` -- never on
//! `hrflow-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
