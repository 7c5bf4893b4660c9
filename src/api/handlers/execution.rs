use crate::api::dto::execution::{CancelResponse, ExecutionResponse, ExecutionsListResponse};
use crate::api::routes::AppState;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
};

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResponse>> {
    let job = state.execution_service.get_job(&id).await?;
    Ok(Json(ExecutionResponse::from(job)))
}

pub async fn list_executions(State(state): State<AppState>) -> Json<ExecutionsListResponse> {
    let jobs = state.execution_service.list_active_jobs().await;
    Json(ExecutionsListResponse {
        data: jobs.into_iter().map(ExecutionResponse::from).collect(),
    })
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.execution_service.cancel(&id).await;
    Json(CancelResponse { cancelled })
}
