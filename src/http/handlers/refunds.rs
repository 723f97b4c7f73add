use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::domain::payment::CreateRefundRequest;
use crate::error::{reject, CoreError, HandlerError};
use crate::http::handlers::idem::run_idempotent;
use crate::AppState;

pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRefundRequest>,
) -> Result<Response, HandlerError> {
    let orchestrator = state.orchestrator.clone();
    let body = req.clone();
    run_idempotent(&state, &headers, &body, || async move {
        let refund = orchestrator.execute_refund(&req).await?;
        let value = serde_json::to_value(&refund).map_err(|e| CoreError::Internal(e.into()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await
}

pub async fn get_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, HandlerError> {
    let refund = state
        .orchestrator
        .refunds_repo
        .find(id)
        .await
        .map_err(|e| reject(CoreError::Internal(e)))?
        .ok_or_else(|| reject(CoreError::NotFound("refund".to_string())))?;
    Ok((StatusCode::OK, Json(refund)).into_response())
}
