//! Workflow definition handlers: publish, list, get, deactivate.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use hrflow_core::workflow::engine::EngineError;
use hrflow_types::definition::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    /// Specific version (default: latest).
    pub version: Option<u32>,
}

fn published(def: WorkflowDefinition, started: Instant) -> (StatusCode, Json<ApiResponse<WorkflowDefinition>>) {
    let href = format!("/api/v1/definitions/{}", def.id);
    let resp = ApiResponse::success(def, started).with_link("self", &href);
    (StatusCode::CREATED, Json(resp))
}

/// POST /api/v1/definitions - Publish a new definition (version 1, or the
/// next version if the body carries an existing id).
pub async fn publish_definition(
    State(state): State<AppState>,
    Json(body): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let started = Instant::now();
    let def = state.engine.publish_definition(body).await?;
    Ok(published(def, started))
}

/// POST /api/v1/definitions/{id}/versions - Publish the next version of `id`.
pub async fn publish_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut body): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let started = Instant::now();
    body.id = id;
    let def = state.engine.publish_definition(body).await?;
    Ok(published(def, started))
}

/// GET /api/v1/definitions - Latest version of every definition.
pub async fn list_definitions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let started = Instant::now();
    let defs = state.engine.list_definitions().await?;
    Ok(Json(
        ApiResponse::success(defs, started).with_link("self", "/api/v1/definitions"),
    ))
}

/// GET /api/v1/definitions/{id}?version=N
pub async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let started = Instant::now();
    let def = state
        .engine
        .get_definition(id, query.version)
        .await?
        .ok_or(EngineError::DefinitionNotFound(id))?;

    let href = format!("/api/v1/definitions/{id}");
    Ok(Json(ApiResponse::success(def, started).with_link("self", &href)))
}

/// POST /api/v1/definitions/{id}/deactivate
pub async fn deactivate_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let started = Instant::now();
    state.engine.deactivate_definition(id).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "id": id, "active": false }),
        started,
    )))
}
