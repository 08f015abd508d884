//! Workflow instance handlers: start, query, approve, cancel, and the
//! approver inbox.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use hrflow_core::workflow::engine::EngineError;
use hrflow_types::approval::{ApprovalAction, ApprovalRecord};
use hrflow_types::definition::BusinessType;
use hrflow_types::instance::{InstanceFilter, InstanceSnapshot};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartInstanceRequest {
    pub definition_id: Uuid,
    /// Defaults to the definition's category.
    pub business_type: Option<BusinessType>,
    pub business_id: String,
    pub initiator_id: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub node_id: String,
    pub approver_id: String,
    pub action: ApprovalAction,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

fn instance_links(resp: ApiResponse<InstanceSnapshot>, id: Uuid) -> ApiResponse<InstanceSnapshot> {
    resp.with_link("self", &format!("/api/v1/instances/{id}"))
        .with_link("approvals", &format!("/api/v1/instances/{id}/approvals"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/instances - Start an instance on the latest active version.
pub async fn start_instance(
    State(state): State<AppState>,
    Json(body): Json<StartInstanceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<InstanceSnapshot>>), AppError> {
    let started = Instant::now();

    if body.business_id.trim().is_empty() || body.initiator_id.trim().is_empty() {
        return Err(AppError::Validation(
            "business_id and initiator_id must not be empty".to_string(),
        ));
    }

    let business_type = match body.business_type {
        Some(b) => b,
        None => {
            state
                .engine
                .get_definition(body.definition_id, None)
                .await?
                .ok_or(EngineError::DefinitionNotFound(body.definition_id))?
                .category
        }
    };

    let id = state
        .engine
        .create_instance(
            body.definition_id,
            business_type,
            &body.business_id,
            &body.initiator_id,
            body.variables,
        )
        .await?;
    let snap = state
        .engine
        .get_instance(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("instance {id} missing after creation")))?;

    Ok((
        StatusCode::CREATED,
        Json(instance_links(ApiResponse::success(snap, started), id)),
    ))
}

/// GET /api/v1/instances?status=&business_type=&business_id=
pub async fn list_instances(
    State(state): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> Result<Json<ApiResponse<Vec<InstanceSnapshot>>>, AppError> {
    let started = Instant::now();
    let instances = state.engine.list_instances(&filter).await?;
    Ok(Json(
        ApiResponse::success(instances, started).with_link("self", "/api/v1/instances"),
    ))
}

/// GET /api/v1/instances/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<InstanceSnapshot>>, AppError> {
    let started = Instant::now();
    let snap = state
        .engine
        .get_instance(id)
        .await?
        .ok_or(EngineError::InstanceNotFound(id))?;
    Ok(Json(instance_links(ApiResponse::success(snap, started), id)))
}

/// GET /api/v1/instances/{id}/approvals
pub async fn get_approvals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ApprovalRecord>>>, AppError> {
    let started = Instant::now();
    if state.engine.get_instance(id).await?.is_none() {
        return Err(EngineError::InstanceNotFound(id).into());
    }
    let records = state.engine.get_approval_records(id).await?;
    Ok(Json(ApiResponse::success(records, started)))
}

/// POST /api/v1/instances/{id}/approvals - Record an approve/reject decision.
pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<InstanceSnapshot>>, AppError> {
    let started = Instant::now();
    let snap = state
        .engine
        .approve(
            id,
            &body.node_id,
            &body.approver_id,
            body.action,
            body.comment.as_deref(),
        )
        .await?;
    Ok(Json(instance_links(ApiResponse::success(snap, started), id)))
}

/// POST /api/v1/instances/{id}/cancel
pub async fn cancel_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<ApiResponse<InstanceSnapshot>>, AppError> {
    let started = Instant::now();
    let reason = body.and_then(|Json(b)| b.reason);
    let snap = state.engine.cancel_instance(id, reason.as_deref()).await?;
    Ok(Json(instance_links(ApiResponse::success(snap, started), id)))
}

/// POST /api/v1/instances/{id}/resume
pub async fn resume_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<InstanceSnapshot>>, AppError> {
    let started = Instant::now();
    let snap = state.engine.resume_instance(id).await?;
    Ok(Json(instance_links(ApiResponse::success(snap, started), id)))
}

/// GET /api/v1/approvers/{approver_id}/pending
pub async fn pending_for_approver(
    State(state): State<AppState>,
    Path(approver_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<InstanceSnapshot>>>, AppError> {
    let started = Instant::now();
    let waiting = state.engine.get_pending_approvals(&approver_id).await?;
    Ok(Json(ApiResponse::success(waiting, started)))
}
