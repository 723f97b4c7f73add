use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::domain::intent::CreateIntentRequest;
use crate::error::{reject, CoreError, HandlerError};
use crate::http::handlers::idem::run_idempotent;
use crate::AppState;

pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateIntentRequest>,
) -> Result<Response, HandlerError> {
    let orchestrator = state.orchestrator.clone();
    let body = req.clone();
    run_idempotent(&state, &headers, &body, || async move {
        let intent = orchestrator.create_intent(req).await?;
        let value = serde_json::to_value(&intent).map_err(|e| CoreError::Internal(e.into()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await
}

pub async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, HandlerError> {
    let intent = state
        .orchestrator
        .intents_repo
        .find(id)
        .await
        .map_err(|e| reject(CoreError::Internal(e)))?
        .ok_or_else(|| reject(CoreError::NotFound("payment intent".to_string())))?;
    Ok((StatusCode::OK, Json(intent)).into_response())
}

pub async fn cancel_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, HandlerError> {
    let orchestrator = state.orchestrator.clone();
    let body = serde_json::json!({ "cancel": id });
    run_idempotent(&state, &headers, &body, || async move {
        let intent = orchestrator.cancel_intent(id).await?;
        let value = serde_json::to_value(&intent).map_err(|e| CoreError::Internal(e.into()))?;
        Ok((StatusCode::OK, value))
    })
    .await
}
