use payments_core::domain::payment::refund_allowed;
use payments_core::risk::{RiskContext, RiskDecision, RiskEngine, RuleBasedRisk};
use payments_core::saga::{
    compensation_targets, recorded_charge, CompensationTarget, SagaInstance, SagaStatus, SagaStep,
    StepData,
};
use uuid::Uuid;

#[test]
fn steps_are_ordered() {
    let ordinals: Vec<i32> = SagaStep::ALL.iter().map(SagaStep::ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
}

#[test]
fn recording_a_step_advances_the_cursor() {
    let mut saga = SagaInstance::payment(Uuid::new_v4());
    assert_eq!(saga.current_step, 0);
    assert_eq!(saga.status, SagaStatus::Running);

    saga.record(SagaStep::Risk, StepData::Risk {
        decision: "PASS".to_string(),
        score: 0.1,
    });
    assert_eq!(saga.current_step, 1);

    saga.record(SagaStep::Route, StepData::Route {
        rail: "cardnet".to_string(),
    });
    assert_eq!(saga.current_step, 2);
    assert_eq!(saga.step_data.len(), 2);
}

#[test]
fn step_data_serializes_with_a_step_tag() {
    let data = StepData::RailCharge {
        rail: "cardnet".to_string(),
        external_ref: "ch_123".to_string(),
        attempt: 0,
    };
    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json["step"], "rail_charge");
    assert_eq!(json["rail"], "cardnet");

    let back: StepData = serde_json::from_value(json).unwrap();
    assert!(matches!(back, StepData::RailCharge { attempt: 0, .. }));
}

#[test]
fn step_data_round_trips_as_a_list() {
    let steps = vec![
        StepData::Risk { decision: "PASS".to_string(), score: 0.0 },
        StepData::Route { rail: "achline".to_string() },
        StepData::LedgerPost { transaction_id: Uuid::new_v4() },
    ];
    let json = serde_json::to_value(&steps).unwrap();
    let back: Vec<StepData> = serde_json::from_value(json).unwrap();
    assert_eq!(back.len(), 3);
    assert!(matches!(back[2], StepData::LedgerPost { .. }));
}

#[test]
fn compensation_notes_carry_the_step_tag() {
    let data = StepData::Compensation {
        of_step: "rail_charge".to_string(),
        note: "compensated".to_string(),
    };
    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json["step"], "compensation");
    assert_eq!(json["of_step"], "rail_charge");

    let back: StepData = serde_json::from_value(json).unwrap();
    assert!(matches!(back, StepData::Compensation { .. }));
}

#[test]
fn saga_status_round_trips_including_frozen() {
    for status in [
        SagaStatus::Running,
        SagaStatus::Compensating,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Compensated,
        SagaStatus::CompensationFailed,
    ] {
        assert_eq!(SagaStatus::parse(status.as_str()), status);
    }
}

#[test]
fn saga_cursor_column_is_an_integer() {
    let schema = include_str!("../migrations/0001_init.sql");
    let line = schema
        .lines()
        .find(|l| l.trim_start().starts_with("current_step"))
        .unwrap();
    assert!(line.contains("INT"), "current_step must decode as i32, got: {line}");
}

#[test]
fn holds_do_not_replay_as_captures() {
    let steps = vec![StepData::RailHold {
        rail: "cardnet".to_string(),
        attempt: 0,
    }];
    assert_eq!(recorded_charge(&steps), None);

    let steps = vec![
        StepData::RailHold { rail: "cardnet".to_string(), attempt: 0 },
        StepData::RailCharge {
            rail: "cardnet".to_string(),
            external_ref: "ch_9".to_string(),
            attempt: 0,
        },
    ];
    assert_eq!(
        recorded_charge(&steps),
        Some(("cardnet".to_string(), "ch_9".to_string()))
    );
}

#[test]
fn unresolved_charge_still_yields_a_release() {
    // A timed-out charge that never reconciled leaves only a hold behind;
    // compensation must release it rather than abandon a possible debit.
    let steps = vec![
        StepData::Risk { decision: "PASS".to_string(), score: 0.1 },
        StepData::Route { rail: "cardnet".to_string() },
        StepData::RailHold { rail: "cardnet".to_string(), attempt: 0 },
    ];
    assert_eq!(
        compensation_targets(&steps),
        vec![CompensationTarget::ReleaseRail {
            rail: "cardnet".to_string(),
            attempt: 0,
        }]
    );
}

#[test]
fn compensation_runs_in_reverse_without_duplicate_releases() {
    let txid = Uuid::new_v4();
    let steps = vec![
        StepData::Risk { decision: "PASS".to_string(), score: 0.1 },
        StepData::Route { rail: "cardnet".to_string() },
        StepData::RailHold { rail: "cardnet".to_string(), attempt: 0 },
        StepData::RailCharge {
            rail: "cardnet".to_string(),
            external_ref: "ch_1".to_string(),
            attempt: 0,
        },
        StepData::LedgerPost { transaction_id: txid },
    ];
    assert_eq!(
        compensation_targets(&steps),
        vec![
            CompensationTarget::ReverseLedger { transaction_id: txid },
            CompensationTarget::ReleaseRail {
                rail: "cardnet".to_string(),
                attempt: 0,
            },
        ]
    );
}

#[test]
fn distinct_attempts_each_get_released() {
    let steps = vec![
        StepData::RailHold { rail: "cardnet".to_string(), attempt: 0 },
        StepData::RailHold { rail: "achline".to_string(), attempt: 1 },
    ];
    let targets = compensation_targets(&steps);
    assert_eq!(targets.len(), 2);
    assert_eq!(
        targets[0],
        CompensationTarget::ReleaseRail { rail: "achline".to_string(), attempt: 1 }
    );
}

#[test]
fn refund_cap_counts_pending_reservations() {
    // Two concurrent full refunds: the first reserves the whole capacity
    // while still pending, so the second fails the cap check.
    assert!(refund_allowed(10_000, 0, 10_000));
    assert!(!refund_allowed(10_000, 10_000, 10_000));
}

#[test]
fn refund_cap_boundaries() {
    assert!(refund_allowed(10_000, 4_000, 6_000));
    assert!(!refund_allowed(10_000, 4_000, 6_001));
    assert!(!refund_allowed(10_000, 4_000, 0));
    assert!(!refund_allowed(10_000, 4_000, -1));
}

#[tokio::test]
async fn small_amounts_pass_risk() {
    let engine = RuleBasedRisk::default();
    let assessment = engine.assess(&ctx(50_000)).await.unwrap();
    assert_eq!(assessment.decision, RiskDecision::Pass);
    assert!(assessment.reasons.is_empty());
}

#[tokio::test]
async fn mid_amounts_are_scored_but_pass() {
    let engine = RuleBasedRisk::default();
    let assessment = engine.assess(&ctx(2_000_000)).await.unwrap();
    assert_eq!(assessment.decision, RiskDecision::Pass);
    assert!((assessment.score - 0.3).abs() < f64::EPSILON);
}

#[tokio::test]
async fn large_amounts_are_challenged() {
    let engine = RuleBasedRisk::default();
    let assessment = engine.assess(&ctx(20_000_000)).await.unwrap();
    assert_eq!(assessment.decision, RiskDecision::Challenge);
}

#[tokio::test]
async fn block_threshold_can_be_tightened() {
    let engine = RuleBasedRisk {
        challenge_threshold: 0.2,
        block_threshold: 0.5,
    };
    let assessment = engine.assess(&ctx(20_000_000)).await.unwrap();
    assert_eq!(assessment.decision, RiskDecision::Block);
}

fn ctx(amount_minor: i64) -> RiskContext {
    RiskContext {
        intent_id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        amount_minor,
        currency: "USD".to_string(),
    }
}
