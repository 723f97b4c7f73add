use payments_core::rails::mock::{MockBehavior, MockRail};
use payments_core::rails::{RailCharge, RailClient};
use payments_core::service::idempotency::{poll_until, IdempotencyStore};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

#[test]
fn request_hash_is_stable_sha256_hex() {
    let a = IdempotencyStore::hash_body(b"{\"amount_minor\":1000}");
    let b = IdempotencyStore::hash_body(b"{\"amount_minor\":1000}");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn request_hash_is_body_sensitive() {
    let a = IdempotencyStore::hash_body(b"{\"amount_minor\":1000}");
    let b = IdempotencyStore::hash_body(b"{\"amount_minor\":1001}");
    assert_ne!(a, b);
}

#[test]
fn empty_body_known_digest() {
    assert_eq!(
        IdempotencyStore::hash_body(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

fn charge() -> RailCharge {
    RailCharge {
        payment_id: Uuid::new_v4(),
        amount_minor: 1_000,
        currency: "USD".to_string(),
        merchant_id: Uuid::new_v4(),
        idempotency_reference: "ref:0".to_string(),
        rail_data: serde_json::json!({}),
    }
}

#[tokio::test]
async fn fail_first_mock_recovers_after_n_calls() {
    let rail = MockRail::new("cardnet", MockBehavior::FailFirst(2));
    assert!(rail.authorize_and_capture(&charge()).await.is_err());
    assert!(rail.authorize_and_capture(&charge()).await.is_err());
    assert!(rail.authorize_and_capture(&charge()).await.is_ok());
}

#[tokio::test]
async fn waiting_caller_picks_up_the_response_once_stored() {
    let calls = AtomicU32::new(0);
    let calls = &calls;
    let got = poll_until(5, std::time::Duration::from_millis(1), || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(None)
        } else {
            Ok(Some("stored response"))
        }
    })
    .await
    .unwrap();
    assert_eq!(got, Some("stored response"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn waiting_caller_gives_up_after_the_bounded_attempts() {
    let calls = AtomicU32::new(0);
    let calls = &calls;
    let got: Option<&str> = poll_until(4, std::time::Duration::from_millis(1), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    })
    .await
    .unwrap();
    assert_eq!(got, None);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn transient_and_permanent_failures_are_distinct() {
    let transient = MockRail::new("cardnet", MockBehavior::AlwaysTimeout);
    let err = transient.authorize_and_capture(&charge()).await.unwrap_err();
    assert!(err.retryable);

    let permanent = MockRail::new("cardnet", MockBehavior::AlwaysFail);
    let err = permanent.authorize_and_capture(&charge()).await.unwrap_err();
    assert!(!err.retryable);
}
