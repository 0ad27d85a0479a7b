use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use csv::{ReaderBuilder, Trim};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{error, warn};

use crate::actors::{AccountActor, ActorReport, ActorSettings};
use crate::models::{Transaction, TransactionRecord};
use crate::service::TransactionService;
use crate::storage::MemoryLedger;
use crate::types::{AccountKey, ExecutionContext};

/// Totals of one engine run.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct RunSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Rows that never reached processing because they could not be parsed or validated.
    pub malformed: usize,
    pub retries: usize
}

impl RunSummary {
    fn record(&mut self, report: ActorReport) {
        self.accepted += report.accepted;
        self.rejected += report.rejected;
        self.failed += report.failed;
        self.retries += report.retries;
    }
}

/// Streams transactions from a CSV file into the ledger, one actor per account.
pub struct AsyncEngine {
    ledger: Arc<MemoryLedger>,
    service: Arc<TransactionService<MemoryLedger, MemoryLedger>>,
    backpressure: usize,
    settings: ActorSettings
}

impl AsyncEngine {
    /// Creates a new engine instance writing to the provided ledger.
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self {
            service: Arc::new(TransactionService::new(ledger.clone(), ledger.clone())),
            ledger,
            backpressure: 256,
            settings: ActorSettings::default()
        }
    }

    pub fn with_backpressure(mut self, backpressure: usize) -> Self {
        self.backpressure = backpressure.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.settings.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = Some(timeout);
        self
    }

    /// Cancelling `context` aborts every transaction still in flight.
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.settings.context = context;
        self
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// Orchestrates the end-to-end transaction processing pipeline for a CSV file.
    pub async fn run(&self, path: &str) -> anyhow::Result<RunSummary> {
        let (sender, receiver) = mpsc::channel::<Transaction>(self.backpressure);
        let csv_handle = self.spawn_csv_reader(path.to_string(), sender);
        let mut summary = self.process_transactions(receiver).await?;

        match csv_handle.await {
            Ok(malformed) => summary.malformed = malformed,
            Err(error) => error!("CSV ingestion failed: {error}")
        }

        Ok(summary)
    }

    fn spawn_csv_reader(&self, path: String, sender: mpsc::Sender<Transaction>) -> JoinHandle<usize> {
        spawn_blocking(move || {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(error) => {
                    error!("Error opening CSV at path: {path} | {error}");
                    return 0;
                }
            };

            let mut reader = ReaderBuilder::new()
                .trim(Trim::All)
                .flexible(true)
                .from_reader(BufReader::new(file));

            let mut malformed = 0;

            for result in reader.deserialize::<TransactionRecord>() {
                let record = match result {
                    Ok(record) => record,
                    Err(error) => {
                        malformed += 1;
                        error!("CSV deserialization error: {error}");
                        continue;
                    }
                };

                match record.into_transaction() {
                    Ok(transaction) => {
                        if sender.blocking_send(transaction).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        malformed += 1;
                        warn!("Invalid transaction record: {error}");
                    }
                }
            }

            malformed
        })
    }

    async fn process_transactions(&self, mut receiver: mpsc::Receiver<Transaction>) -> anyhow::Result<RunSummary> {
        let mut actors = HashMap::<AccountKey, AccountActor>::new();

        // NOTE: Partitioning by account key keeps the submission order of each account intact.
        while let Some(transaction) = receiver.recv().await {
            let actor = actors.entry(transaction.account_key.clone()).or_insert_with(|| {
                AccountActor::new(transaction.account_key.clone(), self.service.clone(), self.settings.clone())
            });

            if !actor.accept(&transaction) {
                error!("Account actor for [{}] could not accept transaction [{}]", actor.account_key(), transaction.key);
            }
        }

        let mut summary = RunSummary::default();
        let despawns = actors.into_values().map(|actor| actor.despawn());

        for result in join_all(despawns).await {
            match result {
                Ok(report) => summary.record(report),
                Err(error) => error!("An account actor did not despawn gracefully: {error:?}")
            }
        }

        Ok(summary)
    }
}
