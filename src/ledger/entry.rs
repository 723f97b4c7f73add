use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Revenue,
    Expense,
    Equity,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
            AccountType::Equity => "EQUITY",
        }
    }

    pub fn parse(s: &str) -> AccountType {
        match s {
            "LIABILITY" => AccountType::Liability,
            "REVENUE" => AccountType::Revenue,
            "EXPENSE" => AccountType::Expense,
            "EQUITY" => AccountType::Equity,
            _ => AccountType::Asset,
        }
    }

    /// Debits increase asset/expense balances; credits increase the rest.
    pub fn debit_positive(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

/// One leg of a balanced transaction. Exactly one of debit/credit is
/// non-zero; amounts are integer minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInput {
    pub account_id: Uuid,
    pub account_type: AccountType,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub currency: String,
    pub reference_type: String,
    pub reference_id: Uuid,
}

impl EntryInput {
    pub fn debit(account_id: Uuid, account_type: AccountType, amount_minor: i64, currency: &str, reference_type: &str, reference_id: Uuid) -> Self {
        Self {
            account_id,
            account_type,
            debit_minor: amount_minor,
            credit_minor: 0,
            currency: currency.to_string(),
            reference_type: reference_type.to_string(),
            reference_id,
        }
    }

    pub fn credit(account_id: Uuid, account_type: AccountType, amount_minor: i64, currency: &str, reference_type: &str, reference_id: Uuid) -> Self {
        Self {
            account_id,
            account_type,
            debit_minor: 0,
            credit_minor: amount_minor,
            currency: currency.to_string(),
            reference_type: reference_type.to_string(),
            reference_id,
        }
    }

    /// Contribution of this entry to its account balance, signed by the
    /// account type's normal direction.
    pub fn signed_minor(&self) -> i64 {
        if self.account_type.debit_positive() {
            self.debit_minor - self.credit_minor
        } else {
            self.credit_minor - self.debit_minor
        }
    }
}

/// Double-entry invariants. A violation here is a programming bug in the
/// caller, never an environmental fault, so it is surfaced as
/// `UnbalancedTransaction` and never retried.
pub fn validate_entries(entries: &[EntryInput]) -> Result<(), CoreError> {
    if entries.len() < 2 {
        return Err(CoreError::UnbalancedTransaction(
            "transaction must have at least 2 entries".to_string(),
        ));
    }

    let mut totals: HashMap<&str, i64> = HashMap::new();
    for entry in entries {
        let debit_set = entry.debit_minor != 0;
        let credit_set = entry.credit_minor != 0;
        if debit_set == credit_set {
            return Err(CoreError::UnbalancedTransaction(
                "entry must carry exactly one of debit or credit".to_string(),
            ));
        }
        if entry.debit_minor < 0 || entry.credit_minor < 0 {
            return Err(CoreError::UnbalancedTransaction(
                "debit and credit amounts must be positive".to_string(),
            ));
        }
        *totals.entry(entry.currency.as_str()).or_insert(0) +=
            entry.debit_minor - entry.credit_minor;
    }

    for (currency, total) in totals {
        if total != 0 {
            return Err(CoreError::UnbalancedTransaction(format!(
                "debits and credits do not balance for {currency}: off by {total}"
            )));
        }
    }

    Ok(())
}
