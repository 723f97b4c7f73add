use anyhow::Result;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::payment::{PaymentStatus, Refund};

#[derive(Clone)]
pub struct RefundsRepo {
    pub pool: PgPool,
}

impl RefundsRepo {
    /// Inserts in the caller's transaction so the reservation commits under
    /// the same payment-row lock as the capacity check.
    pub async fn insert_tx(tx: &mut Transaction<'_, Postgres>, refund: &Refund) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (id, payment_id, amount_minor, currency, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(refund.amount_minor)
        .bind(&refund.currency)
        .bind(&refund.reason)
        .bind(refund.status.as_str())
        .bind(refund.created_at)
        .execute(tx.as_mut())
        .await?;
        Ok(())
    }

    pub async fn mark_succeeded(&self, id: Uuid, ledger_transaction_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE refunds
            SET status = 'SUCCEEDED', ledger_transaction_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ledger_transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE refunds SET status = 'FAILED', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sum of refunds holding or having taken capacity. Pending rows count
    /// (a failed refund frees its reservation via mark_failed), and the
    /// query runs in the caller's payment-row-locked transaction.
    pub async fn reserved_total_tx(
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount_minor), 0)::bigint AS total FROM refunds WHERE payment_id = $1 AND status <> 'FAILED'",
        )
        .bind(payment_id)
        .fetch_one(tx.as_mut())
        .await?;
        Ok(row.get("total"))
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Refund>> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_id, amount_minor, currency, reason, status,
                   ledger_transaction_id, created_at
            FROM refunds WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            Refund {
                id: r.get("id"),
                payment_id: r.get("payment_id"),
                amount_minor: r.get("amount_minor"),
                currency: r.get("currency"),
                reason: r.get("reason"),
                status: PaymentStatus::parse(&status),
                ledger_transaction_id: r.get("ledger_transaction_id"),
                created_at: r.get("created_at"),
            }
        }))
    }
}
