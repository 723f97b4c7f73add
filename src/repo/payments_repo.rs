use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus};

#[derive(Clone)]
pub struct PaymentsRepo {
    pub pool: PgPool,
}

impl PaymentsRepo {
    pub async fn insert(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, intent_id, amount_minor, currency, status, rail,
                rail_reference, failure_code, failure_message, processed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(payment.intent_id)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.rail)
        .bind(&payment.rail_reference)
        .bind(&payment.failure_code)
        .bind(&payment.failure_message)
        .bind(payment.processed_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, intent_id, amount_minor, currency, status, rail, rail_reference,
                   failure_code, failure_message, processed_at, settled_at, created_at
            FROM payments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    /// Loads the payment under a row lock, serializing callers that must
    /// read and then reserve against it (refund capacity checks).
    pub async fn lock_tx(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, intent_id, amount_minor, currency, status, rail, rail_reference,
                   failure_code, failure_message, processed_at, settled_at, created_at
            FROM payments WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await?;
        Ok(row.map(from_row))
    }

    pub async fn find_by_intent(&self, intent_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, intent_id, amount_minor, currency, status, rail, rail_reference,
                   failure_code, failure_message, processed_at, settled_at, created_at
            FROM payments WHERE intent_id = $1
            "#,
        )
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    pub async fn record_outcome(
        &self,
        id: Uuid,
        status: PaymentStatus,
        rail_reference: Option<&str>,
        failure_code: Option<&str>,
        failure_message: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, rail_reference = COALESCE($3, rail_reference),
                failure_code = $4, failure_message = $5,
                processed_at = COALESCE($6, processed_at), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(rail_reference)
        .bind(failure_code)
        .bind(failure_message)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn from_row(r: sqlx::postgres::PgRow) -> Payment {
    let status: String = r.get("status");
    Payment {
        id: r.get("id"),
        intent_id: r.get("intent_id"),
        amount_minor: r.get("amount_minor"),
        currency: r.get("currency"),
        status: PaymentStatus::parse(&status),
        rail: r.get("rail"),
        rail_reference: r.get("rail_reference"),
        failure_code: r.get("failure_code"),
        failure_message: r.get("failure_message"),
        processed_at: r.get("processed_at"),
        settled_at: r.get("settled_at"),
        created_at: r.get("created_at"),
    }
}
