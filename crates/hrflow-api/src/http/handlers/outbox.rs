//! Dead-letter inspection and requeue.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use hrflow_types::notification::NotificationDelivery;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/dead-letters
pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<NotificationDelivery>>>, AppError> {
    let started = Instant::now();
    let dead = state.engine.list_dead_letters().await?;
    Ok(Json(ApiResponse::success(dead, started)))
}

/// POST /api/v1/dead-letters/{key}/requeue - Reset the retry budget; the
/// dispatcher worker picks it up on its next pass.
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let started = Instant::now();
    state.engine.requeue_dead_letter(&key).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "key": key, "requeued": true }),
        started,
    )))
}
