//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/definitions",
            post(handlers::definition::publish_definition).get(handlers::definition::list_definitions),
        )
        .route("/definitions/{id}", get(handlers::definition::get_definition))
        .route(
            "/definitions/{id}/versions",
            post(handlers::definition::publish_version),
        )
        .route(
            "/definitions/{id}/deactivate",
            post(handlers::definition::deactivate_definition),
        )
        // Instances
        .route(
            "/instances",
            post(handlers::instance::start_instance).get(handlers::instance::list_instances),
        )
        .route("/instances/{id}", get(handlers::instance::get_instance))
        .route(
            "/instances/{id}/approvals",
            get(handlers::instance::get_approvals).post(handlers::instance::decide),
        )
        .route("/instances/{id}/cancel", post(handlers::instance::cancel_instance))
        .route("/instances/{id}/resume", post(handlers::instance::resume_instance))
        .route(
            "/approvers/{approver_id}/pending",
            get(handlers::instance::pending_for_approver),
        )
        // Notification outbox
        .route("/dead-letters", get(handlers::outbox::list_dead_letters))
        .route(
            "/dead-letters/{key}/requeue",
            post(handlers::outbox::requeue_dead_letter),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
