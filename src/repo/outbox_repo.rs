use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::event::EventEnvelope;

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub payload: serde_json::Value,
    pub attempts: i32,
}

#[derive(Clone)]
pub struct OutboxRepo {
    pub pool: PgPool,
}

impl OutboxRepo {
    /// Allocates the next per-aggregate version and inserts the event in the
    /// caller's transaction, so business write and event commit together.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        event_type: &str,
        aggregate_id: Uuid,
        data: serde_json::Value,
    ) -> Result<EventEnvelope> {
        // Transaction-scoped advisory lock per aggregate. Without it two
        // emitters read the same MAX and the loser's whole business
        // transaction aborts on the (aggregate_id, version) constraint.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(aggregate_id.to_string())
            .execute(tx.as_mut())
            .await?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM outbox_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(tx.as_mut())
        .await?;
        let version: i64 = row.get("next");

        let envelope = EventEnvelope::new(event_type, aggregate_id, version, data);
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                event_id, event_type, aggregate_id, version, payload,
                status, attempts, next_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, now())
            "#,
        )
        .bind(envelope.event_id)
        .bind(&envelope.event_type)
        .bind(aggregate_id)
        .bind(version)
        .bind(serde_json::to_value(&envelope)?)
        .execute(tx.as_mut())
        .await?;

        Ok(envelope)
    }

    /// Claims due events, lowest unpublished version per aggregate only, so
    /// the relay never publishes version n+1 while n is still outstanding.
    pub async fn lock_pending(&self, batch_size: i64) -> Result<Vec<OutboxRow>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, event_type, aggregate_id, version, payload, attempts
            FROM outbox_events o
            WHERE (
                    (status = 'PENDING' AND next_attempt_at <= now())
                    OR (status = 'PROCESSING' AND updated_at < now() - interval '60 seconds')
                  )
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_events p
                  WHERE p.aggregate_id = o.aggregate_id
                    AND p.version < o.version
                    AND p.status <> 'PUBLISHED'
              )
            ORDER BY aggregate_id, version
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(tx.as_mut())
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        sqlx::query("UPDATE outbox_events SET status = 'PROCESSING', updated_at = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|r| OutboxRow {
                id: r.get("id"),
                event_id: r.get("event_id"),
                event_type: r.get("event_type"),
                aggregate_id: r.get("aggregate_id"),
                version: r.get("version"),
                payload: r.get("payload"),
                attempts: r.get("attempts"),
            })
            .collect())
    }

    pub async fn mark_published(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'PUBLISHED', published_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_retry(&self, id: i64, attempts: i32, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'PENDING', attempts = $2, next_attempt_at = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
