pub mod backoff;
pub mod orchestrator;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Running,
    Compensating,
    Completed,
    Failed,
    Compensated,
    /// A compensating action itself failed; the saga is frozen for manual
    /// intervention rather than guessed closed.
    CompensationFailed,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "RUNNING",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    pub fn parse(s: &str) -> SagaStatus {
        match s {
            "RUNNING" => SagaStatus::Running,
            "COMPENSATING" => SagaStatus::Compensating,
            "COMPLETED" => SagaStatus::Completed,
            "COMPENSATED" => SagaStatus::Compensated,
            "COMPENSATION_FAILED" => SagaStatus::CompensationFailed,
            _ => SagaStatus::Failed,
        }
    }
}

/// Ordered steps of the payment saga. The ordinal doubles as the step
/// component of the per-step idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    Risk,
    Route,
    RailCharge,
    LedgerPost,
    Finalize,
}

impl SagaStep {
    pub const ALL: [SagaStep; 5] = [
        SagaStep::Risk,
        SagaStep::Route,
        SagaStep::RailCharge,
        SagaStep::LedgerPost,
        SagaStep::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SagaStep::Risk => "risk",
            SagaStep::Route => "route",
            SagaStep::RailCharge => "rail_charge",
            SagaStep::LedgerPost => "ledger_post",
            SagaStep::Finalize => "finalize",
        }
    }

    pub fn ordinal(&self) -> i32 {
        SagaStep::ALL.iter().position(|s| s == self).unwrap_or(0) as i32
    }
}

/// Per-step results persisted with the saga instance. Tagged so each saga
/// type stays type-safe in code while the storage schema stays one JSONB
/// column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepData {
    Risk { decision: String, score: f64 },
    Route { rail: String },
    /// Recorded before each charge attempt, so a hold whose outcome was
    /// never confirmed still gets released during compensation.
    RailHold { rail: String, attempt: u32 },
    RailCharge { rail: String, external_ref: String, attempt: u32 },
    LedgerPost { transaction_id: Uuid },
    Compensation { of_step: String, note: String },
}

/// A previously captured charge, if any. Holds do not count; their
/// outcome was never confirmed, so they must not replay as a capture.
pub fn recorded_charge(step_data: &[StepData]) -> Option<(String, String)> {
    step_data.iter().find_map(|d| match d {
        StepData::RailCharge { rail, external_ref, .. } => {
            Some((rail.clone(), external_ref.clone()))
        }
        _ => None,
    })
}

/// External effects compensation must undo, in reverse step order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationTarget {
    ReverseLedger { transaction_id: Uuid },
    ReleaseRail { rail: String, attempt: u32 },
}

impl CompensationTarget {
    pub fn label(&self) -> &'static str {
        match self {
            CompensationTarget::ReverseLedger { .. } => "ledger_post",
            CompensationTarget::ReleaseRail { .. } => "rail_charge",
        }
    }
}

/// Derives compensation targets from recorded step data. A hold and the
/// charge that confirmed it collapse into one release; risk and route
/// decisions have no external effect to undo.
pub fn compensation_targets(step_data: &[StepData]) -> Vec<CompensationTarget> {
    let mut targets = Vec::new();
    for data in step_data.iter().rev() {
        let target = match data {
            StepData::LedgerPost { transaction_id } => CompensationTarget::ReverseLedger {
                transaction_id: *transaction_id,
            },
            StepData::RailHold { rail, attempt }
            | StepData::RailCharge { rail, attempt, .. } => CompensationTarget::ReleaseRail {
                rail: rail.clone(),
                attempt: *attempt,
            },
            _ => continue,
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

#[derive(Debug, Clone)]
pub struct SagaInstance {
    pub id: Uuid,
    pub saga_type: String,
    pub correlation_id: Uuid,
    pub current_step: i32,
    pub step_data: Vec<StepData>,
    pub status: SagaStatus,
}

impl SagaInstance {
    pub fn payment(correlation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_type: "payment".to_string(),
            correlation_id,
            current_step: 0,
            step_data: Vec::new(),
            status: SagaStatus::Running,
        }
    }

    pub fn record(&mut self, step: SagaStep, data: StepData) {
        self.step_data.push(data);
        self.current_step = step.ordinal() + 1;
    }
}
