use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::ledger::entry::{AccountType, EntryInput};

#[derive(Debug, Clone)]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub account_type: AccountType,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub currency: String,
    pub reference_type: String,
    pub reference_id: Uuid,
}

#[derive(Clone)]
pub struct LedgerRepo {
    pub pool: PgPool,
}

impl LedgerRepo {
    pub async fn transaction_exists_tx(
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: Uuid,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE transaction_id = $1) AS present",
        )
        .bind(transaction_id)
        .fetch_one(tx.as_mut())
        .await?;
        Ok(row.get("present"))
    }

    pub async fn insert_entries_tx(
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: Uuid,
        entries: &[EntryInput],
    ) -> Result<()> {
        for (line_no, entry) in entries.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    id, transaction_id, line_no, account_id, account_type,
                    debit_minor, credit_minor, currency, reference_type, reference_id
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(transaction_id)
            .bind(line_no as i32)
            .bind(entry.account_id)
            .bind(entry.account_type.as_str())
            .bind(entry.debit_minor)
            .bind(entry.credit_minor)
            .bind(&entry.currency)
            .bind(entry.reference_type.as_str())
            .bind(entry.reference_id)
            .execute(tx.as_mut())
            .await?;
        }
        Ok(())
    }

    pub async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, account_id, account_type, debit_minor,
                   credit_minor, currency, reference_type, reference_id
            FROM ledger_entries
            WHERE transaction_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Signed balance derived from the append-only entry stream. The sign
    /// convention follows the account type's normal direction.
    pub async fn balance(
        &self,
        account_id: Uuid,
        currency: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(
                CASE WHEN account_type IN ('ASSET', 'EXPENSE')
                     THEN debit_minor - credit_minor
                     ELSE credit_minor - debit_minor
                END
            ), 0)::bigint AS balance
            FROM ledger_entries
            WHERE account_id = $1 AND currency = $2
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            "#,
        )
        .bind(account_id)
        .bind(currency)
        .bind(as_of)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("balance"))
    }

    /// Transaction ids whose entries do not sum to zero per currency.
    /// A non-empty result means a correctness bug somewhere upstream.
    pub async fn unbalanced_transactions(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id
            FROM ledger_entries
            GROUP BY transaction_id, currency
            HAVING SUM(debit_minor) <> SUM(credit_minor)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("transaction_id")).collect())
    }
}

fn from_row(r: sqlx::postgres::PgRow) -> LedgerEntryRow {
    let account_type: String = r.get("account_type");
    LedgerEntryRow {
        id: r.get("id"),
        transaction_id: r.get("transaction_id"),
        account_id: r.get("account_id"),
        account_type: AccountType::parse(&account_type),
        debit_minor: r.get("debit_minor"),
        credit_minor: r.get("credit_minor"),
        currency: r.get("currency"),
        reference_type: r.get("reference_type"),
        reference_id: r.get("reference_id"),
    }
}
