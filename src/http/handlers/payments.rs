use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::domain::payment::CreatePaymentRequest;
use crate::error::{reject, CoreError, HandlerError};
use crate::http::handlers::idem::run_idempotent;
use crate::AppState;

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Response, HandlerError> {
    let orchestrator = state.orchestrator.clone();
    let body = req.clone();
    run_idempotent(&state, &headers, &body, || async move {
        let payment = orchestrator.execute_payment(&req).await?;
        let value = serde_json::to_value(&payment).map_err(|e| CoreError::Internal(e.into()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, HandlerError> {
    let payment = state
        .orchestrator
        .payments_repo
        .find(id)
        .await
        .map_err(|e| reject(CoreError::Internal(e)))?
        .ok_or_else(|| reject(CoreError::NotFound("payment".to_string())))?;
    Ok((StatusCode::OK, Json(payment)).into_response())
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
