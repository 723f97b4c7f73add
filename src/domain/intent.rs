use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a payment intent. Only the saga orchestrator moves an
/// intent between states; once terminal the row is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Created,
    RiskPending,
    Routed,
    RailPending,
    Captured,
    LedgerPosted,
    Completed,
    Refunding,
    Refunded,
    Canceled,
    Failed,
    CompensationFailed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::RiskPending => "RISK_PENDING",
            IntentStatus::Routed => "ROUTED",
            IntentStatus::RailPending => "RAIL_PENDING",
            IntentStatus::Captured => "CAPTURED",
            IntentStatus::LedgerPosted => "LEDGER_POSTED",
            IntentStatus::Completed => "COMPLETED",
            IntentStatus::Refunding => "REFUNDING",
            IntentStatus::Refunded => "REFUNDED",
            IntentStatus::Canceled => "CANCELED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<IntentStatus> {
        Some(match s {
            "CREATED" => IntentStatus::Created,
            "RISK_PENDING" => IntentStatus::RiskPending,
            "ROUTED" => IntentStatus::Routed,
            "RAIL_PENDING" => IntentStatus::RailPending,
            "CAPTURED" => IntentStatus::Captured,
            "LEDGER_POSTED" => IntentStatus::LedgerPosted,
            "COMPLETED" => IntentStatus::Completed,
            "REFUNDING" => IntentStatus::Refunding,
            "REFUNDED" => IntentStatus::Refunded,
            "CANCELED" => IntentStatus::Canceled,
            "FAILED" => IntentStatus::Failed,
            "COMPENSATION_FAILED" => IntentStatus::CompensationFailed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Completed
                | IntentStatus::Refunded
                | IntentStatus::Canceled
                | IntentStatus::Failed
                | IntentStatus::CompensationFailed
        )
    }

    /// Cancellation is only allowed before any external debit is attempted.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            IntentStatus::Created | IntentStatus::RiskPending | IntentStatus::Routed
        )
    }

    /// Once money moved, the only way back out is a refund.
    pub fn can_refund(&self) -> bool {
        matches!(
            self,
            IntentStatus::Captured | IntentStatus::LedgerPosted | IntentStatus::Completed
        )
    }
}

/// Legal edges of the intent state machine. The refund command is the one
/// edge allowed out of `Completed`; every other terminal state is final.
pub fn can_transition(from: IntentStatus, to: IntentStatus) -> bool {
    use IntentStatus::*;
    if from.is_terminal() && !(from == Completed && to == Refunding) {
        return false;
    }
    match (from, to) {
        (Created, RiskPending)
        | (RiskPending, Routed)
        | (Routed, RailPending)
        | (RailPending, Captured)
        | (Captured, LedgerPosted)
        | (LedgerPosted, Completed)
        | (Refunding, Refunded)
        | (Refunding, CompensationFailed) => true,
        (from, Refunding) => from.can_refund(),
        (from, Canceled) => from.can_cancel(),
        (_, Failed) => true,
        (_, CompensationFailed) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
    pub status: IntentStatus,
    pub chosen_rail: Option<String>,
    pub risk_decision: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateIntentRequest {
    pub merchant_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub expires_in_secs: Option<i64>,
}
