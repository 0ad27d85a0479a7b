use rust_decimal::Decimal;

use crate::models::{ProcessingError, Transaction, TransactionType};

/// Balance an account holds before `transaction` is applied.
///
/// An account without history has an implicit balance of zero.
pub fn previous_balance(previous: Option<&Transaction>) -> Decimal {
    previous.map_or(Decimal::ZERO, |previous| previous.balance)
}

/// Checks ordering and sufficiency of `transaction` against the latest stored transaction of its account.
///
/// With no previous transaction any posted timestamp is acceptable.
///
/// # Errors
/// - `OrderingViolation` when the previous transaction is posted after this one.
/// - `DuplicateTimestamp` when both are posted at the same instant.
/// - `InsufficientFunds` when a debit exceeds the previous balance.
pub fn validate_transaction(transaction: &Transaction, previous: Option<&Transaction>) -> Result<(), ProcessingError> {
    if let Some(previous) = previous {
        if previous.posted_timestamp > transaction.posted_timestamp {
            return Err(ProcessingError::ordering_violation(transaction))
        }

        if previous.posted_timestamp == transaction.posted_timestamp {
            return Err(ProcessingError::duplicate_timestamp(transaction))
        }
    }

    if transaction.transaction_type == TransactionType::Debit && transaction.amount > previous_balance(previous) {
        return Err(ProcessingError::insufficient_funds(transaction))
    }

    Ok(())
}

/// Computes the balance after applying `transaction` on top of `previous_balance`.
///
/// # Errors
/// - `InvalidType` for anything other than a credit or a debit.
/// - `BalanceOverflow` if the result does not fit a decimal.
pub fn calculate_new_balance(transaction: &Transaction, previous_balance: Decimal) -> Result<Decimal, ProcessingError> {
    let balance = match transaction.transaction_type {
        TransactionType::Credit => previous_balance.checked_add(transaction.amount),
        TransactionType::Debit => previous_balance.checked_sub(transaction.amount),
        TransactionType::Unrecognized => return Err(ProcessingError::invalid_type(transaction))
    };

    balance.ok_or_else(|| ProcessingError::balance_overflow(transaction))
}
