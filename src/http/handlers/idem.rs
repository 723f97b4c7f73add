use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::future::Future;

use crate::error::{envelope, reject, CoreError, ErrorEnvelope, HandlerError};
use crate::service::idempotency::{Begin, IdempotencyStore};
use crate::AppState;

pub fn require_key(headers: &HeaderMap) -> Result<String, HandlerError> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(envelope(
                    "MISSING_IDEMPOTENCY_KEY",
                    "Idempotency-Key header is required for this operation",
                )),
            )
        })
}

/// Wraps a state-mutating handler body in idempotency begin/complete.
/// A replayed key returns the stored response verbatim; a key reused with a
/// different body is a conflict; a key whose first execution is still
/// running waits for the winner's response, and only a winner that outlasts
/// the wait turns the loser away.
///
/// Business failures (4xx) are stored and replayed like successes. Internal
/// failures release the key so the same request can be retried.
pub async fn run_idempotent<B, F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    body: &B,
    op: F,
) -> Result<Response, HandlerError>
where
    B: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, serde_json::Value), CoreError>>,
{
    let key = require_key(headers)?;
    let bytes = serde_json::to_vec(body).map_err(|e| reject(CoreError::Internal(e.into())))?;
    let hash = IdempotencyStore::hash_body(&bytes);

    match state.idempotency.begin(&key, &hash).await.map_err(reject)? {
        Begin::Replay(cached) => {
            let status =
                StatusCode::from_u16(cached.status_code as u16).unwrap_or(StatusCode::OK);
            Ok((status, Json(cached.body)).into_response())
        }
        Begin::InFlight => {
            // The winner is still executing; wait briefly for its stored
            // response so identical concurrent submissions get identical
            // answers instead of a bounce.
            match state.idempotency.await_response(&key, &hash).await.map_err(reject)? {
                Some(cached) => {
                    let status =
                        StatusCode::from_u16(cached.status_code as u16).unwrap_or(StatusCode::OK);
                    Ok((status, Json(cached.body)).into_response())
                }
                None => Err((
                    StatusCode::CONFLICT,
                    Json(envelope(
                        "REQUEST_IN_FLIGHT",
                        "a request with this idempotency key is still being processed",
                    )),
                )),
            }
        }
        Begin::Fresh => match op().await {
            Ok((status, value)) => {
                state
                    .idempotency
                    .complete(&key, status.as_u16() as i32, value.clone())
                    .await
                    .map_err(reject)?;
                Ok((status, Json(value)).into_response())
            }
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    if let Err(release_err) = state.idempotency.release(&key).await {
                        tracing::error!("failed to release idempotency key: {}", release_err);
                    }
                    return Err(reject(err));
                }
                let env = ErrorEnvelope::from(&err);
                let value = serde_json::to_value(&env)
                    .map_err(|e| reject(CoreError::Internal(e.into())))?;
                state
                    .idempotency
                    .complete(&key, status.as_u16() as i32, value)
                    .await
                    .map_err(reject)?;
                Err(reject(err))
            }
        },
    }
}
