use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer};

use crate::models::{RecordError, Transaction, TransactionType};
use crate::types::{AccountKey, Timestamp, TransactionKey};

/// Represents a single inbound row before it has been validated.
///
/// Every field is optional so that a row with missing values still
/// deserializes and can be reported with all of its problems at once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionRecord {
    pub key: Option<TransactionKey>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub amount: Option<Decimal>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub account_key: Option<AccountKey>,
    pub posted_timestamp: Option<Timestamp>
}

impl TransactionRecord {
    /// Collects every field level problem of the record.
    pub fn validate(&self) -> Vec<RecordError> {
        let mut errors = Vec::new();

        if self.key.is_none() {
            errors.push(RecordError::KeyRequired);
        }

        match self.amount {
            None => errors.push(RecordError::AmountRequired),
            Some(amount) if amount < Decimal::ZERO => errors.push(RecordError::NegativeAmount),
            Some(_) => {}
        }

        match self.transaction_type {
            None => errors.push(RecordError::TypeRequired),
            Some(TransactionType::Unrecognized) => errors.push(RecordError::InvalidType),
            Some(_) => {}
        }

        if self.account_key.is_none() {
            errors.push(RecordError::AccountKeyRequired);
        }

        if self.posted_timestamp.is_none() {
            errors.push(RecordError::PostedTimestampRequired);
        }

        errors
    }

    /// Converts a valid record into a domain transaction with an unset balance.
    ///
    /// # Errors
    /// Returns `RecordError::Invalid` listing every problem found by [`TransactionRecord::validate`].
    pub fn into_transaction(self) -> Result<Transaction, RecordError> {
        let errors = self.validate();

        match self {
            TransactionRecord {
                key: Some(key),
                amount: Some(amount),
                transaction_type: Some(transaction_type),
                account_key: Some(account_key),
                posted_timestamp: Some(posted_timestamp)
            } if errors.is_empty() => Ok(Transaction::new(key, amount, transaction_type, account_key, posted_timestamp)),
            _ => Err(RecordError::Invalid(errors))
        }
    }
}

/// Reads the amount from its textual form so that no digit passes through a float.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None)
    };

    let value = value.trim();

    if value.is_empty() {
        return Ok(None)
    }

    Decimal::from_str(value).map(Some).map_err(de::Error::custom)
}
