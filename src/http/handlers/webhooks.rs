use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{internal, HandlerError};
use crate::repo::webhook_repo::WebhookEndpoint;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterEndpointRequest {
    pub merchant_id: Uuid,
    pub url: String,
    /// Event types to receive, or ["*"] for everything.
    pub event_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterEndpointResponse {
    pub id: Uuid,
    pub url: String,
    pub event_types: Vec<String>,
    /// Shown once at registration; stored server-side for signing.
    pub secret: String,
}

pub async fn register_endpoint(
    State(state): State<AppState>,
    Json(req): Json<RegisterEndpointRequest>,
) -> Result<Response, HandlerError> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let secret = format!("whsec_{}", hex::encode(raw));

    let endpoint = WebhookEndpoint {
        id: Uuid::new_v4(),
        merchant_id: req.merchant_id,
        url: req.url,
        secret: secret.clone(),
        event_types: if req.event_types.is_empty() {
            vec!["*".to_string()]
        } else {
            req.event_types
        },
        active: true,
    };
    state
        .webhook_repo
        .insert_endpoint(&endpoint)
        .await
        .map_err(internal)?;

    let resp = RegisterEndpointResponse {
        id: endpoint.id,
        url: endpoint.url,
        event_types: endpoint.event_types,
        secret,
    };
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub from: DateTime<Utc>,
}

pub async fn replay_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
    Json(req): Json<ReplayRequest>,
) -> Result<Response, HandlerError> {
    let requeued = state
        .webhooks
        .replay(endpoint_id, req.from)
        .await
        .map_err(internal)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "requeued": requeued }))).into_response())
}

pub async fn replay_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, HandlerError> {
    let requeued = state.webhooks.replay_event(event_id).await.map_err(internal)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "requeued": requeued }))).into_response())
}
