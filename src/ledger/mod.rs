pub mod entry;

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::event;
use crate::error::CoreError;
use crate::ledger::entry::{validate_entries, AccountType, EntryInput};
use crate::repo::ledger_repo::LedgerRepo;
use crate::repo::outbox_repo::OutboxRepo;

// Namespace for deriving stable internal account ids.
const ACCOUNT_NS: Uuid = Uuid::from_u128(0x9f2c64d1_40aa_4bd0_8e1b_7a31c25a90e7);

/// Well-known internal accounts. Customer settlement and platform fee
/// accounts are per currency; merchant payables are per merchant.
pub fn customer_settlement_account(currency: &str) -> Uuid {
    Uuid::new_v5(&ACCOUNT_NS, format!("customer-settlement:{currency}").as_bytes())
}

pub fn merchant_payable_account(merchant_id: Uuid) -> Uuid {
    Uuid::new_v5(&ACCOUNT_NS, format!("merchant-payable:{merchant_id}").as_bytes())
}

pub fn platform_fee_account(currency: &str) -> Uuid {
    Uuid::new_v5(&ACCOUNT_NS, format!("platform-fees:{currency}").as_bytes())
}

/// Append-only double-entry ledger. Postings are immutable; corrections
/// are new offsetting transactions.
#[derive(Clone)]
pub struct Ledger {
    pub pool: PgPool,
    pub ledger_repo: LedgerRepo,
    pub platform_fee_bps: i64,
}

impl Ledger {
    /// Posts a balanced set of entries and the `ledger.posted` outbox event
    /// in one database transaction. A transaction id that already has
    /// entries fails with `DuplicateTransaction`; callers racing a replay
    /// treat that as success.
    pub async fn post(
        &self,
        transaction_id: Uuid,
        aggregate_id: Uuid,
        entries: &[EntryInput],
    ) -> Result<(), CoreError> {
        validate_entries(entries)?;

        let mut tx = self.pool.begin().await.map_err(|e| CoreError::Internal(e.into()))?;

        if LedgerRepo::transaction_exists_tx(&mut tx, transaction_id)
            .await
            .map_err(CoreError::Internal)?
        {
            return Err(CoreError::DuplicateTransaction(transaction_id));
        }

        if let Err(e) = LedgerRepo::insert_entries_tx(&mut tx, transaction_id, entries).await {
            // Concurrent writers resolve through the (transaction_id, line_no)
            // unique index; the loser sees 23505 and reports a duplicate.
            if is_unique_violation(&e) {
                return Err(CoreError::DuplicateTransaction(transaction_id));
            }
            return Err(CoreError::Internal(e));
        }

        OutboxRepo::insert_tx(
            &mut tx,
            event::LEDGER_POSTED,
            aggregate_id,
            serde_json::json!({
                "transaction_id": transaction_id,
                "entry_count": entries.len(),
            }),
        )
        .await
        .map_err(CoreError::Internal)?;

        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn balance(
        &self,
        account_id: Uuid,
        currency: &str,
        as_of: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<i64, CoreError> {
        self.ledger_repo
            .balance(account_id, currency, as_of)
            .await
            .map_err(CoreError::Internal)
    }

    pub fn capture_entries(
        &self,
        payment_id: Uuid,
        merchant_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Vec<EntryInput> {
        capture_entries(payment_id, merchant_id, amount_minor, currency, self.platform_fee_bps)
    }

    pub fn refund_entries(
        &self,
        refund_id: Uuid,
        merchant_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Vec<EntryInput> {
        refund_entries(refund_id, merchant_id, amount_minor, currency)
    }

    pub fn offsetting_entries(
        &self,
        refund_id: Uuid,
        original: &[crate::repo::ledger_repo::LedgerEntryRow],
    ) -> Vec<EntryInput> {
        offsetting_entries(refund_id, original)
    }

    pub async fn check_integrity(&self) -> Result<Vec<Uuid>, CoreError> {
        self.ledger_repo
            .unbalanced_transactions()
            .await
            .map_err(CoreError::Internal)
    }
}

/// Balanced entry set for a captured payment: debit the customer settlement
/// account for the gross amount, credit the merchant payable net of fees,
/// credit platform fee revenue.
pub fn capture_entries(
    payment_id: Uuid,
    merchant_id: Uuid,
    amount_minor: i64,
    currency: &str,
    platform_fee_bps: i64,
) -> Vec<EntryInput> {
    let fee_minor = amount_minor * platform_fee_bps / 10_000;
    let net_minor = amount_minor - fee_minor;

    let mut entries = vec![
        EntryInput::debit(
            customer_settlement_account(currency),
            AccountType::Asset,
            amount_minor,
            currency,
            "payment",
            payment_id,
        ),
        EntryInput::credit(
            merchant_payable_account(merchant_id),
            AccountType::Liability,
            net_minor,
            currency,
            "payment",
            payment_id,
        ),
    ];
    if fee_minor > 0 {
        entries.push(EntryInput::credit(
            platform_fee_account(currency),
            AccountType::Revenue,
            fee_minor,
            currency,
            "payment_fee",
            payment_id,
        ));
    }
    entries
}

/// Entries for a (possibly partial) refund: money flows back from the
/// merchant payable to the customer settlement account. Fees are not
/// returned.
pub fn refund_entries(
    refund_id: Uuid,
    merchant_id: Uuid,
    amount_minor: i64,
    currency: &str,
) -> Vec<EntryInput> {
    vec![
        EntryInput::debit(
            merchant_payable_account(merchant_id),
            AccountType::Liability,
            amount_minor,
            currency,
            "refund",
            refund_id,
        ),
        EntryInput::credit(
            customer_settlement_account(currency),
            AccountType::Asset,
            amount_minor,
            currency,
            "refund",
            refund_id,
        ),
    ]
}

/// Mirror of the original capture entries, offsetting them leg for leg.
/// Used by saga compensation to back out a full posting.
pub fn offsetting_entries(
    refund_id: Uuid,
    original: &[crate::repo::ledger_repo::LedgerEntryRow],
) -> Vec<EntryInput> {
    original
        .iter()
        .map(|row| EntryInput {
            account_id: row.account_id,
            account_type: row.account_type,
            debit_minor: row.credit_minor,
            credit_minor: row.debit_minor,
            currency: row.currency.clone(),
            reference_type: "refund".to_string(),
            reference_id: refund_id,
        })
        .collect()
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}
