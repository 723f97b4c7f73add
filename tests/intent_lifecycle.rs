use payments_core::domain::intent::{can_transition, IntentStatus};
use IntentStatus::*;

#[test]
fn happy_path_edges_are_legal() {
    let path = [
        Created,
        RiskPending,
        Routed,
        RailPending,
        Captured,
        LedgerPosted,
        Completed,
    ];
    for pair in path.windows(2) {
        assert!(can_transition(pair[0], pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
    }
}

#[test]
fn skipping_steps_is_illegal() {
    assert!(!can_transition(Created, Routed));
    assert!(!can_transition(RiskPending, RailPending));
    assert!(!can_transition(Routed, Captured));
    assert!(!can_transition(RailPending, Completed));
}

#[test]
fn refund_is_the_only_exit_from_completed() {
    assert!(can_transition(Completed, Refunding));
    assert!(!can_transition(Completed, Failed));
    assert!(!can_transition(Completed, Canceled));
    assert!(!can_transition(Completed, Created));
}

#[test]
fn other_terminal_states_are_final() {
    for terminal in [Refunded, Canceled, Failed, CompensationFailed] {
        for target in [
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
        ] {
            assert!(
                !can_transition(terminal, target),
                "{terminal:?} -> {target:?} should be illegal"
            );
        }
    }
}

#[test]
fn cancel_window_closes_at_rail_pending() {
    assert!(Created.can_cancel());
    assert!(RiskPending.can_cancel());
    assert!(Routed.can_cancel());

    // From RailPending on, a debit may already be in flight.
    assert!(!RailPending.can_cancel());
    assert!(!Captured.can_cancel());
    assert!(!Completed.can_cancel());

    assert!(can_transition(Routed, Canceled));
    assert!(!can_transition(RailPending, Canceled));
}

#[test]
fn refund_window_opens_at_capture() {
    assert!(!Created.can_refund());
    assert!(!RailPending.can_refund());
    assert!(Captured.can_refund());
    assert!(LedgerPosted.can_refund());
    assert!(Completed.can_refund());
    assert!(!Canceled.can_refund());
}

#[test]
fn any_live_state_may_fail() {
    for live in [Created, RiskPending, Routed, RailPending, Captured, LedgerPosted, Refunding] {
        assert!(can_transition(live, Failed), "{live:?} -> Failed");
    }
}

#[test]
fn refunding_resolves_to_refunded_or_compensation_failed() {
    assert!(can_transition(Refunding, Refunded));
    assert!(can_transition(Refunding, CompensationFailed));
    assert!(!can_transition(Refunding, Completed));
}

#[test]
fn resubmission_short_circuits_only_on_terminal_intents() {
    // A resubmitted payment returns the stored result only once the intent
    // is terminal. Mid-flight states, including a capture that crashed
    // before its ledger post, must re-enter the saga and finish.
    for live in [Created, RiskPending, Routed, RailPending, Captured, LedgerPosted] {
        assert!(!live.is_terminal(), "{live:?} must re-enter the saga");
    }
    for done in [Completed, Refunded, Canceled, Failed, CompensationFailed] {
        assert!(done.is_terminal(), "{done:?} replays its recorded outcome");
    }
}

#[test]
fn status_strings_round_trip() {
    for status in [
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
    ] {
        assert_eq!(IntentStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(IntentStatus::parse("NOT_A_STATUS"), None);
}
