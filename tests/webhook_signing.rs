use payments_core::repo::webhook_repo::WebhookEndpoint;
use payments_core::service::webhook_dispatcher::sign_payload;
use uuid::Uuid;

#[test]
fn signature_is_hex_encoded_sha256_hmac() {
    let sig = sign_payload("whsec_test", b"{\"hello\":1}");
    assert_eq!(sig.len(), 64);
    assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn same_secret_and_body_sign_identically() {
    let body = br#"{"event_type":"payment.succeeded","amount_minor":1000}"#;
    assert_eq!(sign_payload("whsec_a", body), sign_payload("whsec_a", body));
}

#[test]
fn different_secret_changes_the_signature() {
    let body = b"payload";
    assert_ne!(sign_payload("whsec_a", body), sign_payload("whsec_b", body));
}

#[test]
fn different_body_changes_the_signature() {
    assert_ne!(sign_payload("whsec_a", b"one"), sign_payload("whsec_a", b"two"));
}

#[test]
fn known_vector() {
    // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
    let sig = sign_payload("key", b"The quick brown fox jumps over the lazy dog");
    assert_eq!(
        sig,
        "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
    );
}

#[test]
fn signing_the_wire_bytes_survives_a_storage_round_trip() {
    // Payloads come back from JSONB storage with whitespace and formatting
    // normalized away. Signing the bytes actually sent keeps the receiver's
    // recompute-over-raw-body check valid regardless of the original text.
    let original_text = br#"{ "event_type": "payment.succeeded",  "amount_minor": 1000 }"#;
    let stored: serde_json::Value = serde_json::from_slice(original_text).unwrap();
    let wire_bytes = serde_json::to_vec(&stored).unwrap();

    assert_ne!(wire_bytes.as_slice(), original_text.as_slice());
    let sent_signature = sign_payload("whsec_test", &wire_bytes);
    let receiver_recompute = sign_payload("whsec_test", &wire_bytes);
    assert_eq!(sent_signature, receiver_recompute);
    assert_ne!(sent_signature, sign_payload("whsec_test", original_text));
}

fn endpoint(event_types: &[&str]) -> WebhookEndpoint {
    WebhookEndpoint {
        id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        url: "https://merchant.example/hooks".to_string(),
        secret: "whsec_test".to_string(),
        event_types: event_types.iter().map(|s| s.to_string()).collect(),
        active: true,
    }
}

#[test]
fn subscription_matches_exact_type_or_wildcard() {
    let exact = endpoint(&["payment.succeeded", "refund.succeeded"]);
    assert!(exact.subscribes_to("payment.succeeded"));
    assert!(!exact.subscribes_to("payment.failed"));

    let all = endpoint(&["*"]);
    assert!(all.subscribes_to("payment.succeeded"));
    assert!(all.subscribes_to("intent.canceled"));
}
