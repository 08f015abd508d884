//! HTTP request handlers for the REST API.

pub mod definition;
pub mod instance;
pub mod outbox;
