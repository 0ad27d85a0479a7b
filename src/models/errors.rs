use crate::models::{Transaction, TransactionType};
use crate::storage::StoreError;
use crate::types::{AccountKey, TransactionKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Could not begin an atomic unit: {source}")]
    UnitBegin {
        source: StoreError
    },
    #[error("Could not read the latest transaction for account [{account_key}]: {source}")]
    Read {
        account_key: AccountKey,
        source: StoreError
    },
    #[error("Transaction [{transaction_key}] for account [{account_key}] rejected: latest processed transaction is posted after this transaction")]
    OrderingViolation {
        transaction_key: TransactionKey,
        account_key: AccountKey
    },
    #[error("Transaction [{transaction_key}] for account [{account_key}] rejected: the posted timestamp must be unique")]
    DuplicateTimestamp {
        transaction_key: TransactionKey,
        account_key: AccountKey
    },
    #[error("Transaction [{transaction_key}] for account [{account_key}] rejected: insufficient funds")]
    InsufficientFunds {
        transaction_key: TransactionKey,
        account_key: AccountKey
    },
    #[error("Transaction [{transaction_key}]:[{transaction_type:?}] for account [{account_key}] rejected: invalid transaction type")]
    InvalidType {
        transaction_key: TransactionKey,
        account_key: AccountKey,
        transaction_type: TransactionType
    },
    #[error("Numeric overflow occurred for transaction [{transaction_key}] for account [{account_key}]")]
    BalanceOverflow {
        transaction_key: TransactionKey,
        account_key: AccountKey
    },
    #[error("Could not save transaction [{transaction_key}] for account [{account_key}]: {source}")]
    Save {
        transaction_key: TransactionKey,
        account_key: AccountKey,
        source: StoreError
    },
    #[error("Could not commit transaction [{transaction_key}] for account [{account_key}]: {source}")]
    Commit {
        transaction_key: TransactionKey,
        account_key: AccountKey,
        source: StoreError
    },
    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        #[source]
        cause: Box<ProcessingError>,
        rollback: StoreError
    }
}

impl ProcessingError {
    pub fn unit_begin(source: StoreError) -> Self {
        Self::UnitBegin { source }
    }

    pub fn read(tx: &Transaction, source: StoreError) -> Self {
        Self::Read { account_key: tx.account_key.clone(), source }
    }

    pub fn ordering_violation(tx: &Transaction) -> Self {
        Self::OrderingViolation {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone()
        }
    }

    pub fn duplicate_timestamp(tx: &Transaction) -> Self {
        Self::DuplicateTimestamp {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone()
        }
    }

    pub fn insufficient_funds(tx: &Transaction) -> Self {
        Self::InsufficientFunds {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone()
        }
    }

    pub fn invalid_type(tx: &Transaction) -> Self {
        Self::InvalidType {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone(),
            transaction_type: tx.transaction_type
        }
    }

    pub fn balance_overflow(tx: &Transaction) -> Self {
        Self::BalanceOverflow {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone()
        }
    }

    pub fn save(tx: &Transaction, source: StoreError) -> Self {
        Self::Save {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone(),
            source
        }
    }

    pub fn commit(tx: &Transaction, source: StoreError) -> Self {
        Self::Commit {
            transaction_key: tx.key.clone(),
            account_key: tx.account_key.clone(),
            source
        }
    }

    pub fn rollback_failed(cause: ProcessingError, rollback: StoreError) -> Self {
        Self::RollbackFailed { cause: Box::new(cause), rollback }
    }

    /// The failure that caused the rollback, looking through a failed rollback.
    pub fn cause(&self) -> &ProcessingError {
        match self {
            Self::RollbackFailed { cause, .. } => cause,
            other => other
        }
    }

    pub fn rollback_error(&self) -> Option<&StoreError> {
        match self {
            Self::RollbackFailed { rollback, .. } => Some(rollback),
            _ => None
        }
    }

    /// Errors the submitter can correct by changing the transaction (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::OrderingViolation { .. } | Self::DuplicateTimestamp { .. } | Self::InsufficientFunds { .. }
        )
    }

    /// Errors worth submitting again unchanged, such as an isolation conflict on commit.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Commit { source, .. } => source.is_retryable(),
            _ => false
        }
    }
}

#[derive(Debug, Eq, PartialEq, Error)]
pub enum RecordError {
    #[error("field key is required")]
    KeyRequired,
    #[error("field amount is required")]
    AmountRequired,
    #[error("field amount must not be negative")]
    NegativeAmount,
    #[error("field type is required")]
    TypeRequired,
    #[error("field type must be CREDIT or DEBIT")]
    InvalidType,
    #[error("field accountKey is required")]
    AccountKeyRequired,
    #[error("field postedTimestamp is required")]
    PostedTimestampRequired,
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<RecordError>)
}
