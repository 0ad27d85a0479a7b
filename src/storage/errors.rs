use crate::types::{AccountKey, ContextError, TransactionKey};
use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("Store error: Account [{account_key}] was modified by a concurrent unit")]
    Conflict {
        account_key: AccountKey
    },
    #[error("Store error: Transaction key [{transaction_key}] already exists")]
    DuplicateKey {
        transaction_key: TransactionKey
    },
    #[error("Store error: Atomic unit is closed")]
    Closed,
    #[error("Store error: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Context(#[from] ContextError)
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
