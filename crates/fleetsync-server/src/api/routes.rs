//! Import and platform-health routes
//!
//! Once a job id has been handed out, import failures are reported only
//! through the job record (`status`, `lastError`, `errorLog`); these routes
//! return errors for the request itself.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::import::StartImportRequest;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Create import and platform routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/imports", post(start_import).get(list_imports))
        .route("/imports/:id", get(get_import))
        .route("/imports/:id/progress", get(get_progress))
        .route("/imports/:id/pause", post(pause_import))
        .route("/imports/:id/resume", post(resume_import))
        .route("/imports/:id/abandon", post(abandon_import))
        .route("/imports/:id/rollback", post(rollback_import))
        .route("/platform/health", get(platform_health))
        .route("/platform/health/history", delete(clear_health_history))
}

#[derive(Debug, Deserialize)]
pub struct ListImportsQuery {
    pub limit: Option<usize>,
}

/// Start an import in the background
///
/// POST /imports
#[tracing::instrument(skip(state, request), fields(import_type = request.import_type.as_str()))]
async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> Result<Response, AppError> {
    let job_id = state.orchestrator.start_import(request).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
}

/// GET /imports?limit=20
async fn list_imports(
    State(state): State<AppState>,
    Query(query): Query<ListImportsQuery>,
) -> Result<Response, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let jobs = state.orchestrator.list_jobs(limit).await?;
    Ok(Json(json!({ "data": jobs })).into_response())
}

/// GET /imports/:id
async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = state.orchestrator.get_job(id).await?;
    Ok(Json(job).into_response())
}

/// GET /imports/:id/progress
async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let progress = state.orchestrator.progress(id).await?;
    Ok(Json(progress).into_response())
}

/// Pause a running import; returns once the run has stopped
///
/// POST /imports/:id/pause
#[tracing::instrument(skip(state))]
async fn pause_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = state.orchestrator.pause(id).await?;
    Ok(Json(job).into_response())
}

/// POST /imports/:id/resume
#[tracing::instrument(skip(state))]
async fn resume_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = state.orchestrator.resume(id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)).into_response())
}

/// POST /imports/:id/abandon
#[tracing::instrument(skip(state))]
async fn abandon_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = state.orchestrator.abandon(id).await?;
    Ok(Json(job).into_response())
}

/// Restore local records from the job's backup
///
/// POST /imports/:id/rollback
#[tracing::instrument(skip(state))]
async fn rollback_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let report = state.orchestrator.rollback(id).await?;
    Ok(Json(report).into_response())
}

/// GET /platform/health
async fn platform_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.monitor().get_health_metrics())
}

/// DELETE /platform/health/history
async fn clear_health_history(State(state): State<AppState>) -> impl IntoResponse {
    let monitor = state.orchestrator.monitor();
    monitor.clear_history();
    Json(monitor.get_health_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_import_routes_build() {
        let _router = import_routes();
    }
}
