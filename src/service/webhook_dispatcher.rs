use anyhow::Result;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::event::EventEnvelope;
use crate::repo::webhook_repo::WebhookRepo;
use crate::saga::backoff::webhook_delay_minutes;

type HmacSha256 = Hmac<Sha256>;

/// Signs the canonical payload bytes with the endpoint secret, hex encoded.
/// Receivers recompute over the raw request body and compare.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Fans events out to subscribed endpoints and drives the delivery loop.
/// Deliveries are per (endpoint, aggregate) ordered, retried on a doubling
/// minute schedule, and dead-lettered past max_attempts.
#[derive(Clone)]
pub struct WebhookDispatcher {
    pub webhook_repo: WebhookRepo,
    pub http: reqwest::Client,
    pub max_attempts: i32,
    pub timeout_ms: u64,
}

impl WebhookDispatcher {
    /// Creates one delivery row per subscribed active endpoint. Idempotent
    /// per (endpoint, event): a repeated fan-out of the same event is a
    /// no-op.
    pub async fn fan_out(&self, envelope: &EventEnvelope) -> Result<()> {
        let endpoints = self.webhook_repo.active_endpoints().await?;
        let payload = serde_json::to_value(envelope)?;
        let body = serde_json::to_vec(&payload)?;

        for endpoint in endpoints {
            if !endpoint.subscribes_to(&envelope.event_type) {
                continue;
            }
            let signature = sign_payload(&endpoint.secret, &body);
            self.webhook_repo
                .insert_delivery(
                    Uuid::new_v4(),
                    endpoint.id,
                    &envelope.event_type,
                    envelope.event_id,
                    envelope.aggregate_id,
                    envelope.version,
                    &payload,
                    &signature,
                    self.max_attempts,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn run(self) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::error!("webhook dispatcher error: {}", err);
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    async fn tick(&self) -> Result<()> {
        let batch = self.webhook_repo.lock_due(50).await?;
        for delivery in batch {
            if let Err(err) = self.deliver_one(&delivery).await {
                tracing::error!(delivery_id = %delivery.id, "delivery bookkeeping failed: {}", err);
            }
        }
        Ok(())
    }

    async fn deliver_one(&self, delivery: &crate::repo::webhook_repo::DeliveryRow) -> Result<()> {
        let body = serde_json::to_vec(&delivery.payload)?;
        // Signed over the exact bytes going on the wire. The JSONB round
        // trip through storage may not reproduce the fan-out serialization
        // byte for byte, so the stored signature cannot be trusted here.
        let signature = sign_payload(&delivery.secret, &body);
        let send = self
            .http
            .post(&delivery.url)
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header("content-type", "application/json")
            .header("x-event-id", delivery.event_id.to_string())
            .header("x-event-type", delivery.event_type.as_str())
            .header("x-event-version", delivery.version.to_string())
            .header("x-signature", signature.as_str())
            .body(body)
            .send()
            .await;

        match send {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                let truncated = body.chars().take(1024).collect::<String>();
                self.webhook_repo.mark_delivered(delivery.id, status, &truncated).await?;
                tracing::info!(
                    delivery_id = %delivery.id,
                    event_type = %delivery.event_type,
                    "webhook delivered"
                );
                Ok(())
            }
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                self.handle_failure(delivery, Some(status), &format!("http status {status}"))
                    .await
            }
            Err(err) => self.handle_failure(delivery, None, &err.to_string()).await,
        }
    }

    async fn handle_failure(
        &self,
        delivery: &crate::repo::webhook_repo::DeliveryRow,
        response_status: Option<i32>,
        reason: &str,
    ) -> Result<()> {
        let attempts_after = delivery.attempt_count + 1;
        if attempts_after >= delivery.max_attempts {
            self.webhook_repo.mark_exhausted(delivery.id, reason).await?;
            tracing::warn!(
                delivery_id = %delivery.id,
                endpoint_id = %delivery.endpoint_id,
                attempts = attempts_after,
                "webhook dead-lettered: {}",
                reason
            );
            return Ok(());
        }

        let next = Utc::now() + Duration::minutes(webhook_delay_minutes(attempts_after));
        self.webhook_repo
            .mark_retry(delivery.id, next, response_status, reason)
            .await?;
        tracing::debug!(
            delivery_id = %delivery.id,
            attempt = attempts_after,
            "webhook retry scheduled: {}",
            reason
        );
        Ok(())
    }

    /// Re-enqueues past deliveries for an endpoint from a point in time.
    pub async fn replay(&self, endpoint_id: Uuid, from: chrono::DateTime<Utc>) -> Result<u64> {
        self.webhook_repo.replay_endpoint(endpoint_id, from).await
    }

    /// Re-enqueues one event's deliveries across all its endpoints.
    pub async fn replay_event(&self, event_id: Uuid) -> Result<u64> {
        self.webhook_repo.replay_event(event_id).await
    }
}
