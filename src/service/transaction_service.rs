use std::sync::Arc;

use tracing::{debug, error};

use crate::models::{calculate_new_balance, previous_balance, validate_transaction, ProcessingError, Transaction};
use crate::storage::{AtomicUnit, AtomicUnitManager, TransactionStore};
use crate::types::ExecutionContext;

/// Applies transactions to account ledgers, one atomic unit per transaction.
///
/// The service holds no locks of its own. Isolation between concurrent calls on
/// the same account comes entirely from the atomic units handed out by `M`.
pub struct TransactionService<S, M> {
    store: Arc<S>,
    units: Arc<M>
}

impl<S, M> TransactionService<S, M>
where
    S: TransactionStore,
    M: AtomicUnitManager<Unit = S::Unit>
{
    pub fn new(store: Arc<S>, units: Arc<M>) -> Self {
        Self { store, units }
    }

    /// Validates `transaction` against the latest transaction of its account, computes
    /// the resulting balance and persists it.
    ///
    /// Any balance carried by `transaction` is overwritten. Exactly one of commit or
    /// rollback happens on every path that got as far as beginning a unit.
    ///
    /// # Errors
    /// Returns `ProcessingError` if:
    /// - The unit could not be started, read from, saved to or committed.
    /// - The transaction is not posted strictly after the latest one of its account.
    /// - A debit exceeds the current balance.
    /// - The transaction type is not a credit or a debit.
    ///
    /// Failures before commit are returned after a rollback. If the rollback fails as well
    /// both errors are returned together as `ProcessingError::RollbackFailed`.
    pub async fn process_transaction(&self, mut transaction: Transaction, context: &ExecutionContext) -> Result<(), ProcessingError> {
        let mut unit = context.guard(self.units.begin(context)).await
            .map_err(ProcessingError::unit_begin)?;

        if let Err(error) = self.apply(&mut unit, &mut transaction, context).await {
            return Err(Self::rollback(unit, error).await)
        }

        unit.commit().await
            .map_err(|error| ProcessingError::commit(&transaction, error))?;

        debug!("Transaction [{}] for account [{}] committed with balance [{}]", transaction.key, transaction.account_key, transaction.balance);

        Ok(())
    }

    async fn apply(&self, unit: &mut S::Unit, transaction: &mut Transaction, context: &ExecutionContext) -> Result<(), ProcessingError> {
        let latest = context.guard(self.store.query_latest_for_account(unit, &transaction.account_key)).await
            .map_err(|error| ProcessingError::read(transaction, error))?;

        if latest.is_none() {
            debug!("Using implicit zero balance for account [{}]", transaction.account_key);
        }

        validate_transaction(transaction, latest.as_ref())?;
        transaction.balance = calculate_new_balance(transaction, previous_balance(latest.as_ref()))?;

        context.guard(self.store.save(unit, transaction)).await
            .map_err(|error| ProcessingError::save(transaction, error))
    }

    async fn rollback(unit: S::Unit, cause: ProcessingError) -> ProcessingError {
        match unit.rollback().await {
            Ok(()) => cause,
            Err(rollback) => {
                error!("Rollback failed after [{cause}]: {rollback}");
                ProcessingError::rollback_failed(cause, rollback)
            }
        }
    }
}
