use std::sync::Arc;
use std::time::Duration;

use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

use crate::models::{ProcessingError, Transaction};
use crate::service::TransactionService;
use crate::storage::{AtomicUnitManager, TransactionStore};
use crate::types::{AccountKey, ExecutionContext};

/// Caller side policy applied by every actor.
#[derive(Debug, Clone)]
pub struct ActorSettings {
    /// How many times a retryable failure (a commit conflict) is submitted again.
    pub max_retries: u32,
    /// Deadline applied to each individual attempt.
    pub request_timeout: Option<Duration>,
    /// Parent of every per-attempt context, cancelling it aborts in-flight work.
    pub context: ExecutionContext
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: None,
            context: ExecutionContext::new()
        }
    }
}

/// Outcome counts of the transactions an actor handled.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct ActorReport {
    pub accepted: usize,
    /// Rejected for a reason the submitter can correct (ordering, duplicate timestamp, funds).
    pub rejected: usize,
    pub failed: usize,
    pub retries: usize
}

/// Applies the transactions of a single account strictly in the order they are accepted.
pub struct AccountActor {
    account_key: AccountKey,
    sender: mpsc::UnboundedSender<Transaction>,
    handle: JoinHandle<ActorReport>
}

impl AccountActor {
    /// Spawns a new actor for `account_key`.
    pub fn new<S, M>(account_key: AccountKey, service: Arc<TransactionService<S, M>>, settings: ActorSettings) -> Self
    where
        S: TransactionStore,
        M: AtomicUnitManager<Unit = S::Unit>
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Transaction>();
        let task_account_key = account_key.clone();

        let handle = spawn(async move {
            let mut report = ActorReport::default();

            while let Some(transaction) = receiver.recv().await {
                let (result, retries) = Self::process_with_retry(&service, &settings, transaction.clone()).await;
                report.retries += retries;

                match result {
                    Ok(()) => {
                        report.accepted += 1;
                        debug!("Transaction [{}]:[{:?}] for account [{}] processed", transaction.key, transaction.transaction_type, transaction.account_key);
                    },
                    Err(error) if error.is_client_error() => {
                        report.rejected += 1;
                        warn!("{error}");
                    },
                    Err(error) => {
                        report.failed += 1;

                        match error.rollback_error() {
                            Some(rollback) => error!("Rollback of transaction [{}] failed: {rollback} | caused by: {}", transaction.key, error.cause()),
                            None => error!("{error}")
                        }
                    }
                }
            }

            debug!("Account actor for [{task_account_key}] stopped: {report:?}");

            report
        });

        Self { account_key, sender, handle }
    }

    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// Queues a transaction, returns `false` if the actor is no longer running.
    pub fn accept(&self, transaction: &Transaction) -> bool {
        self.sender.send(transaction.clone()).is_ok()
    }

    /// Closes the queue and waits for every queued transaction to be processed.
    pub async fn despawn(self) -> Result<ActorReport, JoinError> {
        drop(self.sender);
        self.handle.await
    }

    async fn process_with_retry<S, M>(service: &TransactionService<S, M>, settings: &ActorSettings, transaction: Transaction) -> (Result<(), ProcessingError>, usize)
    where
        S: TransactionStore,
        M: AtomicUnitManager<Unit = S::Unit>
    {
        let mut retries = 0;

        loop {
            let mut context = settings.context.child();

            if let Some(timeout) = settings.request_timeout {
                context = context.with_timeout(timeout);
            }

            match service.process_transaction(transaction.clone(), &context).await {
                Err(error) if error.is_retryable() && retries < settings.max_retries as usize => {
                    retries += 1;
                    debug!("Retrying transaction [{}] after: {error}", transaction.key);
                }
                result => return (result, retries)
            }
        }
    }
}
