use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::Transaction;
use crate::storage::{AtomicUnit, AtomicUnitManager, StoreError, TransactionStore};
use crate::types::{AccountKey, ExecutionContext, TransactionKey};

#[derive(Debug, Default)]
struct AccountLedger {
    /// Bumped on every committed write, used to detect concurrent modification.
    version: u64,
    /// Sorted by posted timestamp.
    transactions: Vec<Transaction>
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: DashMap<AccountKey, AccountLedger>,
    keys: DashMap<TransactionKey, AccountKey>,
    commit_lock: Mutex<()>,
    next_unit_id: AtomicU64,
    closed: AtomicBool
}

/// In-memory transaction store with optimistic, serializable atomic units.
///
/// Units buffer their writes and remember the version of every account they read.
/// Commit re-validates those versions under a store wide lock, so two units that
/// observed the same latest row of an account can never both commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<LedgerState>
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops handing out new units. Units already open can still finish.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    /// Latest committed transaction of an account, outside of any unit.
    #[cfg(test)]
    pub fn latest_for_account(&self, account_key: &str) -> Option<Transaction> {
        self.state.accounts.get(account_key)
            .and_then(|ledger| ledger.transactions.last().cloned())
    }

    /// Every committed transaction ordered by account key, then posted timestamp.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = self.state.accounts.iter()
            .flat_map(|ledger| ledger.transactions.clone())
            .collect();

        transactions.sort_by(|left, right| {
            left.account_key.cmp(&right.account_key)
                .then(left.posted_timestamp.cmp(&right.posted_timestamp))
        });

        transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.state.keys.len()
    }

    #[cfg(test)]
    pub(super) async fn hold_commit_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.state.commit_lock.lock().await
    }

    fn owns(&self, unit: &MemoryUnit) -> Result<(), StoreError> {
        if Arc::ptr_eq(&self.state, &unit.state) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("Atomic unit [{}] belongs to a different ledger", unit.id)))
        }
    }
}

/// An open unit of work against a [`MemoryLedger`].
#[derive(Debug)]
pub struct MemoryUnit {
    id: u64,
    state: Arc<LedgerState>,
    context: ExecutionContext,
    reads: HashMap<AccountKey, u64>,
    writes: Vec<Transaction>,
    open: bool
}

impl MemoryUnit {
    fn read_latest(&mut self, account_key: &AccountKey) -> Result<Option<Transaction>, StoreError> {
        self.context.check()?;

        let (version, committed) = match self.state.accounts.get(account_key) {
            Some(ledger) => (ledger.version, ledger.transactions.last().cloned()),
            None => (0, None)
        };

        self.reads.entry(account_key.clone()).or_insert(version);

        let staged = self.writes.iter()
            .filter(|transaction| transaction.account_key == *account_key)
            .max_by_key(|transaction| transaction.posted_timestamp)
            .cloned();

        Ok(match (committed, staged) {
            (Some(committed), Some(staged)) if committed.posted_timestamp > staged.posted_timestamp => Some(committed),
            (committed, staged) => staged.or(committed)
        })
    }

    fn stage(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        self.context.check()?;

        if self.state.keys.contains_key(&transaction.key) || self.writes.iter().any(|staged| staged.key == transaction.key) {
            return Err(StoreError::DuplicateKey { transaction_key: transaction.key.clone() })
        }

        self.writes.push(transaction.clone());

        Ok(())
    }

    fn publish(&mut self) -> Result<usize, StoreError> {
        for (account_key, version) in &self.reads {
            let current = self.state.accounts.get(account_key).map_or(0, |ledger| ledger.version);

            if current != *version {
                return Err(StoreError::Conflict { account_key: account_key.clone() })
            }
        }

        if let Some(duplicate) = self.writes.iter().find(|staged| self.state.keys.contains_key(&staged.key)) {
            return Err(StoreError::DuplicateKey { transaction_key: duplicate.key.clone() })
        }

        let published = self.writes.len();

        for transaction in self.writes.drain(..) {
            self.state.keys.insert(transaction.key.clone(), transaction.account_key.clone());

            let mut ledger = self.state.accounts.entry(transaction.account_key.clone()).or_default();
            let position = ledger.transactions
                .partition_point(|existing| existing.posted_timestamp <= transaction.posted_timestamp);

            ledger.transactions.insert(position, transaction);
            ledger.version += 1;
        }

        Ok(published)
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    async fn commit(mut self) -> Result<(), StoreError> {
        self.open = false;

        let state = Arc::clone(&self.state);
        let _commit_guard = self.context.guard(async { Ok::<_, StoreError>(state.commit_lock.lock().await) }).await?;
        let published = self.publish()?;

        debug!("Atomic unit [{}] committed {} transaction(s)", self.id, published);

        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.writes.clear();

        debug!("Atomic unit [{}] rolled back", self.id);

        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if self.open {
            warn!("Atomic unit [{}] dropped without commit or rollback, {} staged transaction(s) discarded", self.id, self.writes.len());
        }
    }
}

#[async_trait]
impl AtomicUnitManager for MemoryLedger {
    type Unit = MemoryUnit;

    async fn begin(&self, context: &ExecutionContext) -> Result<MemoryUnit, StoreError> {
        context.check()?;

        if self.state.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed)
        }

        let id = self.state.next_unit_id.fetch_add(1, Ordering::Relaxed);

        Ok(MemoryUnit {
            id,
            state: Arc::clone(&self.state),
            context: context.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
            open: true
        })
    }
}

#[async_trait]
impl TransactionStore for MemoryLedger {
    type Unit = MemoryUnit;

    async fn save(&self, unit: &mut MemoryUnit, transaction: &Transaction) -> Result<(), StoreError> {
        self.owns(unit)?;
        unit.stage(transaction)
    }

    async fn query_latest_for_account(&self, unit: &mut MemoryUnit, account_key: &AccountKey) -> Result<Option<Transaction>, StoreError> {
        self.owns(unit)?;
        unit.read_latest(account_key)
    }
}
