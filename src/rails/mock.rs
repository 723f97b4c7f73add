use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::rails::{RailCharge, RailChargeStatus, RailClient, RailError, RailReceipt};

/// Scripted behaviors for local runs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    AlwaysSucceed,
    AlwaysFail,
    AlwaysTimeout,
    /// Fails the first n calls, then succeeds.
    FailFirst(u32),
}

pub struct MockRail {
    pub id: String,
    pub behavior: MockBehavior,
    calls: AtomicU32,
}

impl MockRail {
    pub fn new(id: &str, behavior: MockBehavior) -> Self {
        Self {
            id: id.to_string(),
            behavior,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl RailClient for MockRail {
    fn rail_id(&self) -> &str {
        &self.id
    }

    async fn authorize_and_capture(&self, charge: &RailCharge) -> Result<RailReceipt, RailError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        match self.behavior {
            MockBehavior::AlwaysSucceed => Ok(RailReceipt {
                external_ref: format!("{}_txn_{}", self.id, charge.payment_id),
                processed_at: Utc::now(),
            }),
            MockBehavior::AlwaysFail => Err(RailError::permanent("MOCK_DECLINED", "mock decline")),
            MockBehavior::AlwaysTimeout => Err(RailError::transient("MOCK_TIMEOUT", "mock timeout")),
            MockBehavior::FailFirst(n) => {
                if call < n {
                    Err(RailError::transient("MOCK_UNAVAILABLE", "mock transient failure"))
                } else {
                    Ok(RailReceipt {
                        external_ref: format!("{}_txn_{}", self.id, charge.payment_id),
                        processed_at: Utc::now(),
                    })
                }
            }
        }
    }

    async fn query_status(&self, _idempotency_reference: &str) -> Result<RailChargeStatus, RailError> {
        Ok(match self.behavior {
            MockBehavior::AlwaysSucceed => RailChargeStatus::Succeeded,
            MockBehavior::AlwaysFail => RailChargeStatus::Failed,
            MockBehavior::AlwaysTimeout => RailChargeStatus::Unknown,
            MockBehavior::FailFirst(_) => RailChargeStatus::Failed,
        })
    }

    async fn release(&self, _idempotency_reference: &str) -> Result<(), RailError> {
        Ok(())
    }
}
