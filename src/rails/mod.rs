pub mod http;
pub mod mock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RailCharge {
    pub payment_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub merchant_id: Uuid,
    /// Stable across retries of the same attempt so rails can dedup.
    pub idempotency_reference: String,
    pub rail_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailReceipt {
    pub external_ref: String,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of a status query, used to reconcile unknown outcomes after a
/// timed-out charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailChargeStatus {
    Succeeded,
    Failed,
    Pending,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RailError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RailError {
    pub fn transient(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            retryable: true,
        }
    }

    pub fn permanent(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            retryable: false,
        }
    }
}

/// Capability a money-movement rail must provide. One implementation per
/// rail; the router maps rail ids onto instances.
#[async_trait::async_trait]
pub trait RailClient: Send + Sync {
    fn rail_id(&self) -> &str;

    async fn authorize_and_capture(&self, charge: &RailCharge) -> Result<RailReceipt, RailError>;

    /// Looks up a charge by its idempotency reference. Drives reconciliation
    /// when the original call timed out with an unknown outcome.
    async fn query_status(&self, idempotency_reference: &str) -> Result<RailChargeStatus, RailError>;

    /// Compensation hook: releases any hold the rail still has for the
    /// reference. Must be idempotent.
    async fn release(&self, idempotency_reference: &str) -> Result<(), RailError>;
}
