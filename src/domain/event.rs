use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INTENT_CREATED: &str = "intent.created";
pub const INTENT_CANCELED: &str = "intent.canceled";
pub const INTENT_FAILED: &str = "intent.failed";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const LEDGER_POSTED: &str = "ledger.posted";
pub const REFUND_SUCCEEDED: &str = "refund.succeeded";
pub const COMPENSATION_APPLIED: &str = "compensation.applied";
pub const COMPENSATION_FAILED: &str = "compensation.failed";

/// Versioned envelope written into the outbox and delivered to webhooks.
/// `version` is the per-aggregate monotonic ordinal consumers dedup on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: &str, aggregate_id: Uuid, version: i64, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            aggregate_id,
            version,
            occurred_at: Utc::now(),
            data,
        }
    }
}
