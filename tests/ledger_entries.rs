use payments_core::error::CoreError;
use payments_core::ledger::entry::{validate_entries, AccountType, EntryInput};
use payments_core::ledger::{
    capture_entries, customer_settlement_account, merchant_payable_account, offsetting_entries,
    platform_fee_account, refund_entries,
};
use payments_core::repo::ledger_repo::LedgerEntryRow;
use uuid::Uuid;

fn debit(amount: i64, currency: &str) -> EntryInput {
    EntryInput::debit(Uuid::new_v4(), AccountType::Asset, amount, currency, "test", Uuid::new_v4())
}

fn credit(amount: i64, currency: &str) -> EntryInput {
    EntryInput::credit(Uuid::new_v4(), AccountType::Liability, amount, currency, "test", Uuid::new_v4())
}

#[test]
fn balanced_pair_validates() {
    assert!(validate_entries(&[debit(500, "USD"), credit(500, "USD")]).is_ok());
}

#[test]
fn rejects_single_entry() {
    let err = validate_entries(&[debit(500, "USD")]).unwrap_err();
    assert!(matches!(err, CoreError::UnbalancedTransaction(_)));
}

#[test]
fn rejects_unbalanced_totals() {
    let err = validate_entries(&[debit(500, "USD"), credit(499, "USD")]).unwrap_err();
    assert!(matches!(err, CoreError::UnbalancedTransaction(_)));
}

#[test]
fn balances_per_currency_not_across() {
    // 500 USD debit against 500 EUR credit nets to zero overall but is
    // unbalanced in both currencies.
    let err = validate_entries(&[debit(500, "USD"), credit(500, "EUR")]).unwrap_err();
    assert!(matches!(err, CoreError::UnbalancedTransaction(_)));

    let ok = validate_entries(&[
        debit(500, "USD"),
        credit(500, "USD"),
        debit(900, "EUR"),
        credit(900, "EUR"),
    ]);
    assert!(ok.is_ok());
}

#[test]
fn rejects_entry_with_both_sides_set() {
    let mut entry = debit(500, "USD");
    entry.credit_minor = 500;
    let err = validate_entries(&[entry, credit(500, "USD")]).unwrap_err();
    assert!(matches!(err, CoreError::UnbalancedTransaction(_)));
}

#[test]
fn rejects_entry_with_neither_side_set() {
    let mut entry = debit(0, "USD");
    entry.debit_minor = 0;
    let err = validate_entries(&[entry, credit(500, "USD")]).unwrap_err();
    assert!(matches!(err, CoreError::UnbalancedTransaction(_)));
}

#[test]
fn capture_splits_fee_and_balances() {
    let payment_id = Uuid::new_v4();
    let merchant_id = Uuid::new_v4();
    // 200 bps on 10_000 = 200 fee, 9_800 net.
    let entries = capture_entries(payment_id, merchant_id, 10_000, "USD", 200);
    assert_eq!(entries.len(), 3);
    assert!(validate_entries(&entries).is_ok());

    let customer = customer_settlement_account("USD");
    let merchant = merchant_payable_account(merchant_id);
    let fees = platform_fee_account("USD");

    let leg = |account| entries.iter().find(|e| e.account_id == account).unwrap();
    assert_eq!(leg(customer).debit_minor, 10_000);
    assert_eq!(leg(merchant).credit_minor, 9_800);
    assert_eq!(leg(fees).credit_minor, 200);
}

#[test]
fn capture_with_zero_fee_has_two_legs() {
    let entries = capture_entries(Uuid::new_v4(), Uuid::new_v4(), 10_000, "USD", 0);
    assert_eq!(entries.len(), 2);
    assert!(validate_entries(&entries).is_ok());
}

#[test]
fn fee_rounds_down_and_still_balances() {
    // 200 bps of 99 minor units truncates to 1.
    let entries = capture_entries(Uuid::new_v4(), Uuid::new_v4(), 99, "USD", 200);
    assert!(validate_entries(&entries).is_ok());
    let fee = entries
        .iter()
        .find(|e| e.reference_type == "payment_fee")
        .unwrap();
    assert_eq!(fee.credit_minor, 1);
}

#[test]
fn refund_moves_money_back_without_fee_return() {
    let merchant_id = Uuid::new_v4();
    let entries = refund_entries(Uuid::new_v4(), merchant_id, 4_000, "USD");
    assert_eq!(entries.len(), 2);
    assert!(validate_entries(&entries).is_ok());

    let merchant_leg = entries
        .iter()
        .find(|e| e.account_id == merchant_payable_account(merchant_id))
        .unwrap();
    assert_eq!(merchant_leg.debit_minor, 4_000);
    assert!(!entries.iter().any(|e| e.account_id == platform_fee_account("USD")));
}

#[test]
fn offsetting_entries_mirror_each_leg() {
    let merchant_id = Uuid::new_v4();
    let original = capture_entries(Uuid::new_v4(), merchant_id, 10_000, "USD", 200);
    let rows: Vec<LedgerEntryRow> = original
        .iter()
        .map(|e| LedgerEntryRow {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            account_id: e.account_id,
            account_type: e.account_type,
            debit_minor: e.debit_minor,
            credit_minor: e.credit_minor,
            currency: e.currency.clone(),
            reference_type: e.reference_type.clone(),
            reference_id: e.reference_id,
        })
        .collect();

    let reversal = offsetting_entries(Uuid::new_v4(), &rows);
    assert_eq!(reversal.len(), original.len());
    assert!(validate_entries(&reversal).is_ok());
    for (orig, rev) in original.iter().zip(&reversal) {
        assert_eq!(orig.debit_minor, rev.credit_minor);
        assert_eq!(orig.credit_minor, rev.debit_minor);
        assert_eq!(orig.account_id, rev.account_id);
    }
    // Net effect of posting plus reversal is zero on every account.
    for (orig, rev) in original.iter().zip(&reversal) {
        assert_eq!(orig.signed_minor() + rev.signed_minor(), 0);
    }
}

#[test]
fn balance_direction_follows_account_type() {
    assert!(AccountType::Asset.debit_positive());
    assert!(AccountType::Expense.debit_positive());
    assert!(!AccountType::Liability.debit_positive());
    assert!(!AccountType::Revenue.debit_positive());
    assert!(!AccountType::Equity.debit_positive());

    let asset = EntryInput::debit(Uuid::new_v4(), AccountType::Asset, 100, "USD", "test", Uuid::new_v4());
    assert_eq!(asset.signed_minor(), 100);
    let liability = EntryInput::debit(Uuid::new_v4(), AccountType::Liability, 100, "USD", "test", Uuid::new_v4());
    assert_eq!(liability.signed_minor(), -100);
}

#[test]
fn internal_account_ids_are_stable() {
    assert_eq!(customer_settlement_account("USD"), customer_settlement_account("USD"));
    assert_ne!(customer_settlement_account("USD"), customer_settlement_account("EUR"));
    let m = Uuid::new_v4();
    assert_eq!(merchant_payable_account(m), merchant_payable_account(m));
}
