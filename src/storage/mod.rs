mod errors;
mod memory_ledger;

use async_trait::async_trait;

use crate::models::Transaction;
use crate::types::{AccountKey, ExecutionContext};

pub use errors::StoreError;
pub use memory_ledger::MemoryLedger;

/// A unit of work that is either committed or rolled back, never both.
#[async_trait]
pub trait AtomicUnit: Send {
    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Starts atomic units bound to an execution context.
#[async_trait]
pub trait AtomicUnitManager: Send + Sync + 'static {
    type Unit: AtomicUnit;

    async fn begin(&self, context: &ExecutionContext) -> Result<Self::Unit, StoreError>;
}

/// Durable table of transactions keyed by transaction key.
///
/// Reads and writes go through an open unit so that they become visible to
/// other units only once that unit commits.
#[async_trait]
pub trait TransactionStore: Send + Sync + 'static {
    type Unit: AtomicUnit;

    async fn save(&self, unit: &mut Self::Unit, transaction: &Transaction) -> Result<(), StoreError>;

    /// Returns the transaction with the greatest posted timestamp for the account, if any.
    async fn query_latest_for_account(&self, unit: &mut Self::Unit, account_key: &AccountKey) -> Result<Option<Transaction>, StoreError>;
}
