use chrono::{Duration, Utc};
use payments_core::error::CoreError;
use payments_core::router::health::{HealthThresholds, RailHealth, RailState};
use payments_core::router::{RailConfig, RailRouter, RouterConfig, SelectionPolicy};

fn thresholds() -> HealthThresholds {
    HealthThresholds {
        consecutive_errors: 3,
        window: Duration::seconds(120),
        base_ejection: Duration::seconds(30),
        max_ejection: Duration::seconds(240),
    }
}

fn rail(id: &str, priority: i32, weight: u32) -> RailConfig {
    RailConfig {
        id: id.to_string(),
        priority,
        weight,
    }
}

#[test]
fn ejects_after_consecutive_errors() {
    let t = thresholds();
    let now = Utc::now();
    let mut health = RailHealth::new();

    health.record(false, 100, &t, now);
    health.record(false, 100, &t, now);
    assert_eq!(health.state, RailState::Closed);

    health.record(false, 100, &t, now);
    assert_eq!(health.state, RailState::Open);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(30)));
}

#[test]
fn success_resets_the_error_streak() {
    let t = thresholds();
    let now = Utc::now();
    let mut health = RailHealth::new();

    health.record(false, 100, &t, now);
    health.record(false, 100, &t, now);
    health.record(true, 100, &t, now);
    health.record(false, 100, &t, now);
    health.record(false, 100, &t, now);
    assert_eq!(health.state, RailState::Closed);
}

#[test]
fn ejection_duration_doubles_and_caps() {
    let t = thresholds();
    let now = Utc::now();
    let mut health = RailHealth::new();

    let eject = |health: &mut RailHealth| {
        for _ in 0..3 {
            health.record(false, 100, &t, now);
        }
    };

    eject(&mut health);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(30)));

    // Recover through a half-open probe failure, which re-ejects directly.
    health.sweep(now + Duration::seconds(31));
    assert_eq!(health.state, RailState::HalfOpen);
    health.record(false, 100, &t, now);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(60)));

    health.sweep(now + Duration::seconds(61));
    health.record(false, 100, &t, now);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(120)));

    health.sweep(now + Duration::seconds(121));
    health.record(false, 100, &t, now);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(240)));

    // Capped at max_ejection from here on.
    health.sweep(now + Duration::seconds(241));
    health.record(false, 100, &t, now);
    assert_eq!(health.ejected_until, Some(now + Duration::seconds(240)));
}

#[test]
fn half_open_success_closes() {
    let t = thresholds();
    let now = Utc::now();
    let mut health = RailHealth::new();
    for _ in 0..3 {
        health.record(false, 100, &t, now);
    }
    health.sweep(now + Duration::seconds(31));
    assert_eq!(health.state, RailState::HalfOpen);

    health.record(true, 100, &t, now + Duration::seconds(32));
    assert_eq!(health.state, RailState::Closed);
    assert_eq!(health.ejected_until, None);
}

#[test]
fn open_rail_is_not_eligible_until_window_expires() {
    let t = thresholds();
    let now = Utc::now();
    let mut health = RailHealth::new();
    for _ in 0..3 {
        health.record(false, 100, &t, now);
    }
    assert!(!health.eligible());

    health.sweep(now + Duration::seconds(29));
    assert!(!health.eligible());

    health.sweep(now + Duration::seconds(30));
    assert!(health.eligible());
}

#[test]
fn priority_policy_prefers_lowest_priority_number() {
    let router = RailRouter::new(
        vec![rail("achline", 2, 50), rail("cardnet", 1, 100)],
        RouterConfig::default(),
    );
    assert_eq!(router.select_rail().unwrap(), "cardnet");
}

#[test]
fn failing_rail_is_routed_around() {
    let config = RouterConfig {
        thresholds: thresholds(),
        min_healthy_rails: 1,
        ..RouterConfig::default()
    };
    let router = RailRouter::new(vec![rail("cardnet", 1, 100), rail("achline", 2, 50)], config);

    for _ in 0..3 {
        router.record_outcome("cardnet", false, 900);
    }
    assert_eq!(router.select_rail().unwrap(), "achline");
}

#[test]
fn min_healthy_readmits_the_last_rail() {
    let config = RouterConfig {
        thresholds: thresholds(),
        max_ejection_percent: 100,
        min_healthy_rails: 1,
        ..RouterConfig::default()
    };
    let router = RailRouter::new(vec![rail("cardnet", 1, 100), rail("achline", 2, 50)], config);

    for _ in 0..3 {
        router.record_outcome("cardnet", false, 900);
        router.record_outcome("achline", false, 900);
    }
    // Both rails earned ejection, but the floor forces one back as a probe.
    let chosen = router.select_rail().unwrap();
    assert!(chosen == "cardnet" || chosen == "achline");
}

#[test]
fn max_ejection_percent_limits_how_many_go_dark() {
    let config = RouterConfig {
        thresholds: thresholds(),
        max_ejection_percent: 50,
        min_healthy_rails: 0,
        ..RouterConfig::default()
    };
    let router = RailRouter::new(
        vec![rail("a", 1, 1), rail("b", 2, 1), rail("c", 3, 1), rail("d", 4, 1)],
        config,
    );

    for id in ["a", "b", "c", "d"] {
        for _ in 0..3 {
            router.record_outcome(id, false, 900);
        }
    }
    let open = router
        .snapshot()
        .into_iter()
        .filter(|s| s.state == RailState::Open)
        .count();
    assert!(open <= 2);
}

#[test]
fn no_rails_at_all_is_no_healthy_rail() {
    let router = RailRouter::new(Vec::new(), RouterConfig::default());
    assert!(matches!(router.select_rail(), Err(CoreError::NoHealthyRail)));
}

#[test]
fn weighted_policy_prefers_heavier_rail() {
    let config = RouterConfig {
        policy: SelectionPolicy::Weighted,
        ..RouterConfig::default()
    };
    let router = RailRouter::new(vec![rail("cardnet", 1, 10), rail("achline", 2, 90)], config);
    assert_eq!(router.select_rail().unwrap(), "achline");
}

#[test]
fn least_failure_policy_follows_observed_rates() {
    let config = RouterConfig {
        policy: SelectionPolicy::LeastFailure,
        thresholds: thresholds(),
        ..RouterConfig::default()
    };
    let router = RailRouter::new(vec![rail("cardnet", 1, 100), rail("achline", 2, 50)], config);

    router.record_outcome("cardnet", false, 500);
    router.record_outcome("cardnet", true, 100);
    router.record_outcome("achline", true, 100);
    router.record_outcome("achline", true, 100);
    assert_eq!(router.select_rail().unwrap(), "achline");
}
