mod errors;
mod record;
mod rules;
mod transaction;

use serde::{Deserialize, Serialize};

pub use errors::{ProcessingError, RecordError};
pub use record::TransactionRecord;
pub use rules::{calculate_new_balance, previous_balance, validate_transaction};
pub use transaction::Transaction;

/// Direction of a movement against an account balance.
///
/// Values other than `CREDIT` and `DEBIT` are kept as `Unrecognized` so they
/// can be rejected explicitly instead of failing somewhere deep in parsing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Credit,
    Debit,
    #[serde(other)]
    Unrecognized
}
