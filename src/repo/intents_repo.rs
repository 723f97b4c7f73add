use anyhow::Result;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::intent::{IntentStatus, PaymentIntent};

#[derive(Clone)]
pub struct IntentsRepo {
    pub pool: PgPool,
}

impl IntentsRepo {
    pub async fn insert(&self, intent: &PaymentIntent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (
                id, merchant_id, amount_minor, currency, description, status,
                chosen_rail, risk_decision, metadata, created_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(intent.id)
        .bind(intent.merchant_id)
        .bind(intent.amount_minor)
        .bind(&intent.currency)
        .bind(&intent.description)
        .bind(intent.status.as_str())
        .bind(&intent.chosen_rail)
        .bind(&intent.risk_decision)
        .bind(&intent.metadata)
        .bind(intent.created_at)
        .bind(intent.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<PaymentIntent>> {
        let row = sqlx::query(
            r#"
            SELECT id, merchant_id, amount_minor, currency, description, status,
                   chosen_rail, risk_decision, metadata, created_at, expires_at
            FROM payment_intents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    /// Compare-and-set on status. Returns false when the row was not in
    /// `from`, which callers treat as "someone else already moved it".
    pub async fn transition(&self, id: Uuid, from: IntentStatus, to: IntentStatus) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE payment_intents SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Same compare-and-set inside the caller's transaction, for moves that
    /// must commit together with other writes (e.g. an outbox event).
    pub async fn transition_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE payment_intents SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(tx.as_mut())
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn set_risk_decision(&self, id: Uuid, decision: &str) -> Result<()> {
        sqlx::query("UPDATE payment_intents SET risk_decision = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(decision)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_chosen_rail(&self, id: Uuid, rail: &str) -> Result<()> {
        sqlx::query("UPDATE payment_intents SET chosen_rail = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(rail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn from_row(r: sqlx::postgres::PgRow) -> PaymentIntent {
    let status: String = r.get("status");
    PaymentIntent {
        id: r.get("id"),
        merchant_id: r.get("merchant_id"),
        amount_minor: r.get("amount_minor"),
        currency: r.get("currency"),
        description: r.get("description"),
        status: IntentStatus::parse(&status).unwrap_or(IntentStatus::Failed),
        chosen_rail: r.get("chosen_rail"),
        risk_decision: r.get("risk_decision"),
        metadata: r.get("metadata"),
        created_at: r.get("created_at"),
        expires_at: r.get("expires_at"),
    }
}
