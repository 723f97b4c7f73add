use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{reject, HandlerError};
use crate::AppState;

pub async fn rail_health(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.router.snapshot()))
}

/// Ops check: lists transaction ids whose entries do not net to zero.
/// An empty list is the only healthy answer.
pub async fn ledger_integrity(State(state): State<AppState>) -> Result<Response, HandlerError> {
    let unbalanced = state
        .orchestrator
        .ledger
        .check_integrity()
        .await
        .map_err(reject)?;
    let body = serde_json::json!({
        "balanced": unbalanced.is_empty(),
        "unbalanced_transaction_ids": unbalanced,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}
