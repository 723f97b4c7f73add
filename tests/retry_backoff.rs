use payments_core::saga::backoff::{webhook_delay_minutes, BackoffPolicy};
use std::time::Duration;

#[test]
fn delay_curve_doubles_from_base() {
    let policy = BackoffPolicy {
        base_ms: 50,
        factor: 2.0,
        cap_ms: 30_000,
    };
    assert_eq!(policy.delay(0), Duration::from_millis(50));
    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(5), Duration::from_millis(1_600));
}

#[test]
fn delay_is_capped() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.delay(20), Duration::from_millis(30_000));
    assert_eq!(policy.delay(63), Duration::from_millis(30_000));
}

#[test]
fn jitter_stays_within_half_to_full() {
    let policy = BackoffPolicy {
        base_ms: 1_000,
        factor: 2.0,
        cap_ms: 30_000,
    };
    for _ in 0..100 {
        let d = policy.jittered(2);
        assert!(d >= Duration::from_millis(2_000), "{d:?}");
        assert!(d <= Duration::from_millis(4_000), "{d:?}");
    }
}

#[test]
fn webhook_schedule_is_doubling_minutes() {
    assert_eq!(webhook_delay_minutes(1), 1);
    assert_eq!(webhook_delay_minutes(2), 2);
    assert_eq!(webhook_delay_minutes(3), 4);
    assert_eq!(webhook_delay_minutes(4), 8);
    assert_eq!(webhook_delay_minutes(5), 16);
}

#[test]
fn webhook_schedule_clamps_odd_inputs() {
    assert_eq!(webhook_delay_minutes(0), 1);
    assert_eq!(webhook_delay_minutes(-3), 1);
    assert_eq!(webhook_delay_minutes(40), 1 << 15);
}
