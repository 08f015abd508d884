//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use hrflow_core::workflow::engine::EngineError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine errors, mapped per variant.
    Engine(EngineError),
    /// Malformed request input.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Engine(e) => {
                let (status, code) = match e {
                    EngineError::DefinitionNotFound(_) => (StatusCode::NOT_FOUND, "DEFINITION_NOT_FOUND"),
                    EngineError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, "INSTANCE_NOT_FOUND"),
                    EngineError::DeliveryNotFound(_) => (StatusCode::NOT_FOUND, "DEAD_LETTER_NOT_FOUND"),
                    EngineError::DefinitionInvalid(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "DEFINITION_INVALID")
                    }
                    EngineError::Execution(_) => (StatusCode::UNPROCESSABLE_ENTITY, "EVALUATION_FAILED"),
                    EngineError::DefinitionInactive(_) => (StatusCode::CONFLICT, "DEFINITION_INACTIVE"),
                    EngineError::InstanceNotRunning { .. } => (StatusCode::CONFLICT, "INSTANCE_NOT_RUNNING"),
                    EngineError::NodeNotInFrontier(_) => (StatusCode::CONFLICT, "NODE_NOT_ACTIVE"),
                    EngineError::AlreadyDecided { .. } => (StatusCode::CONFLICT, "ALREADY_DECIDED"),
                    EngineError::NodeAlreadyResolved(_) => (StatusCode::CONFLICT, "NODE_ALREADY_RESOLVED"),
                    EngineError::NotAnApprover { .. } => (StatusCode::FORBIDDEN, "NOT_AN_APPROVER"),
                    EngineError::ConcurrentModification(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "CONCURRENT_MODIFICATION")
                    }
                    EngineError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
                };
                (status, code, e.to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        } else {
            tracing::debug!(code, error = %message, "request rejected");
        }

        (status, Json(ApiResponse::error(code, &message))).into_response()
    }
}
