use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub active: bool,
}

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type || t == "*")
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub payload: serde_json::Value,
    pub signature: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub url: String,
    pub secret: String,
}

#[derive(Clone)]
pub struct WebhookRepo {
    pub pool: PgPool,
}

impl WebhookRepo {
    pub async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (id, merchant_id, url, secret, event_types, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(endpoint.id)
        .bind(endpoint.merchant_id)
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(&endpoint.event_types)
        .bind(endpoint.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn active_endpoints(&self) -> Result<Vec<WebhookEndpoint>> {
        let rows = sqlx::query(
            "SELECT id, merchant_id, url, secret, event_types, active FROM webhook_endpoints WHERE active = true",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(endpoint_from_row).collect())
    }

    pub async fn insert_delivery(
        &self,
        id: Uuid,
        endpoint_id: Uuid,
        event_type: &str,
        event_id: Uuid,
        aggregate_id: Uuid,
        version: i64,
        payload: &serde_json::Value,
        signature: &str,
        max_attempts: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (
                id, endpoint_id, event_type, event_id, aggregate_id, version,
                payload, signature, status, attempt_count, max_attempts, next_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', 0, $9, now())
            ON CONFLICT (endpoint_id, event_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(endpoint_id)
        .bind(event_type)
        .bind(event_id)
        .bind(aggregate_id)
        .bind(version)
        .bind(payload)
        .bind(signature)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claims due deliveries. For each (endpoint, aggregate) only the oldest
    /// undelivered row is eligible, which keeps per-pair creation order.
    pub async fn lock_due(&self, batch_size: i64) -> Result<Vec<DeliveryRow>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.endpoint_id, d.event_type, d.event_id, d.aggregate_id,
                   d.version, d.payload, d.signature, d.attempt_count, d.max_attempts,
                   e.url, e.secret
            FROM webhook_deliveries d
            JOIN webhook_endpoints e ON e.id = d.endpoint_id
            WHERE (
                    (d.status IN ('PENDING', 'RETRYING') AND d.next_attempt_at <= now())
                    OR (d.status = 'PROCESSING' AND d.updated_at < now() - interval '60 seconds')
                  )
              AND NOT EXISTS (
                  SELECT 1 FROM webhook_deliveries p
                  WHERE p.endpoint_id = d.endpoint_id
                    AND p.aggregate_id = d.aggregate_id
                    AND (p.created_at, p.id) < (d.created_at, d.id)
                    AND p.status IN ('PENDING', 'RETRYING', 'PROCESSING')
              )
            ORDER BY d.created_at, d.id
            LIMIT $1
            FOR UPDATE OF d SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(tx.as_mut())
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        sqlx::query("UPDATE webhook_deliveries SET status = 'PROCESSING', updated_at = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|r| DeliveryRow {
                id: r.get("id"),
                endpoint_id: r.get("endpoint_id"),
                event_type: r.get("event_type"),
                event_id: r.get("event_id"),
                aggregate_id: r.get("aggregate_id"),
                version: r.get("version"),
                payload: r.get("payload"),
                signature: r.get("signature"),
                attempt_count: r.get("attempt_count"),
                max_attempts: r.get("max_attempts"),
                url: r.get("url"),
                secret: r.get("secret"),
            })
            .collect())
    }

    pub async fn mark_delivered(&self, id: Uuid, response_status: i32, response_body: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'DELIVERED', attempt_count = attempt_count + 1,
                response_status = $2, response_body = $3,
                delivered_at = now(), next_attempt_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        response_status: Option<i32>,
        failure_reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'RETRYING', attempt_count = attempt_count + 1,
                next_attempt_at = $2, response_status = $3,
                failure_reason = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(response_status)
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dead-letters the delivery; it leaves the retry sweep for good.
    pub async fn mark_exhausted(&self, id: Uuid, failure_reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'FAILED', attempt_count = attempt_count + 1,
                failure_reason = $2, next_attempt_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-enqueues deliveries for an endpoint from a point in time, keeping
    /// the original creation order via untouched created_at.
    pub async fn replay_endpoint(&self, endpoint_id: Uuid, from: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'PENDING', attempt_count = 0, next_attempt_at = now(),
                failure_reason = NULL, updated_at = now()
            WHERE endpoint_id = $1 AND created_at >= $2
              AND status IN ('DELIVERED', 'FAILED')
            "#,
        )
        .bind(endpoint_id)
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Re-enqueues one event's deliveries across all endpoints that ever
    /// received a row for it.
    pub async fn replay_event(&self, event_id: Uuid) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'PENDING', attempt_count = 0, next_attempt_at = now(),
                failure_reason = NULL, updated_at = now()
            WHERE event_id = $1
              AND status IN ('DELIVERED', 'FAILED')
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

fn endpoint_from_row(r: sqlx::postgres::PgRow) -> WebhookEndpoint {
    WebhookEndpoint {
        id: r.get("id"),
        merchant_id: r.get("merchant_id"),
        url: r.get("url"),
        secret: r.get("secret"),
        event_types: r.get("event_types"),
        active: r.get("active"),
    }
}
