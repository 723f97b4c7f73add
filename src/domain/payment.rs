use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> PaymentStatus {
        match s {
            "PENDING" => PaymentStatus::Pending,
            "PROCESSING" => PaymentStatus::Processing,
            "SUCCEEDED" => PaymentStatus::Succeeded,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub rail: String,
    pub rail_reference: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Cap check for a new refund. `reserved_minor` must include pending
/// refunds, not just succeeded ones, so concurrent requests racing for
/// the same capacity cannot both pass.
pub fn refund_allowed(captured_minor: i64, reserved_minor: i64, refund_minor: i64) -> bool {
    refund_minor > 0 && reserved_minor.saturating_add(refund_minor) <= captured_minor
}

#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub status: PaymentStatus,
    pub ledger_transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatePaymentRequest {
    pub intent_id: Uuid,
    /// Rail-specific authorization data, passed through opaquely.
    #[serde(default)]
    pub rail_data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    pub amount_minor: i64,
    pub reason: Option<String>,
}
