use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::TransactionType;
use crate::types::{AccountKey, Timestamp, TransactionKey};

/// A single movement against an account together with the balance it left behind.
///
/// Every stored row is a self contained ledger checkpoint: the `balance` of the
/// latest row for an account is that account's current balance.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Transaction {
    /// Caller assigned unique key.
    pub key: TransactionKey,
    /// Non-negative magnitude of the movement.
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub account_key: AccountKey,
    /// Logical time the transaction takes effect, strictly increasing per account.
    pub posted_timestamp: Timestamp,
    /// Balance right after this transaction. Computed during processing, never supplied by callers.
    pub balance: Decimal
}

impl Transaction {
    pub fn new(
        key: impl Into<TransactionKey>,
        amount: Decimal,
        transaction_type: TransactionType,
        account_key: impl Into<AccountKey>,
        posted_timestamp: Timestamp
    ) -> Self {
        Self {
            key: key.into(),
            amount,
            transaction_type,
            account_key: account_key.into(),
            posted_timestamp,
            balance: Decimal::ZERO
        }
    }
}
