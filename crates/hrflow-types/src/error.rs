use thiserror::Error;

/// Errors raised by storage adapters.
///
/// `Conflict` is how a conditional write reports that the row changed
/// underneath it (version mismatch or a record no longer pending).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
