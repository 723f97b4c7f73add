use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status_code: Option<i32>,
    pub response: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct IdempotencyRepo {
    pub pool: PgPool,
}

impl IdempotencyRepo {
    pub async fn find_valid(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, request_hash, status_code, response
            FROM idempotency_keys
            WHERE key = $1 AND expires_at > now()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IdempotencyRecord {
            key: r.get("key"),
            request_hash: r.get("request_hash"),
            status_code: r.get("status_code"),
            response: r.get("response"),
        }))
    }

    /// Reserves the key. An expired row is taken over as if fresh. Returns
    /// false when another live caller holds the key; the loser re-reads and
    /// replays.
    pub async fn try_reserve(
        &self,
        key: &str,
        request_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET request_hash = EXCLUDED.request_hash,
                    status_code = NULL,
                    response = NULL,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_keys.expires_at < now()
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn store_response(
        &self,
        key: &str,
        status_code: i32,
        response: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE idempotency_keys SET status_code = $2, response = $3 WHERE key = $1",
        )
        .bind(key)
        .bind(status_code)
        .bind(response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drops a reservation that never completed, so the caller can retry
    /// with the same key.
    pub async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND response IS NULL")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
