use super::TransactionService;
use crate::models::{ProcessingError, Transaction, TransactionType};
use crate::storage::{AtomicUnit, AtomicUnitManager, MemoryLedger, StoreError, TransactionStore};
use crate::types::{AccountKey, ContextError, ExecutionContext, Timestamp};

use std::future::pending;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const ACCOUNT_KEY: &str = "account-1";
const TIMESTAMP_0: &str = "2020-12-31T00:00:00Z";
const TIMESTAMP_1: &str = "2021-01-01T00:00:00Z";
const TIMESTAMP_2: &str = "2021-01-02T00:00:00Z";

#[derive(Debug, Default)]
struct Calls {
    begins: usize,
    reads: Vec<AccountKey>,
    saves: Vec<Transaction>,
    commits: usize,
    rollbacks: usize
}

#[derive(Debug, Default, Clone)]
struct Failures {
    begin: Option<StoreError>,
    read: Option<StoreError>,
    stall_read: bool,
    save: Option<StoreError>,
    commit: Option<StoreError>,
    rollback: Option<StoreError>
}

fn outcome(failure: &Option<StoreError>) -> Result<(), StoreError> {
    failure.clone().map_or(Ok(()), Err)
}

struct MockUnit {
    calls: Arc<Mutex<Calls>>,
    failures: Failures
}

#[async_trait]
impl AtomicUnit for MockUnit {
    async fn commit(self) -> Result<(), StoreError> {
        self.calls.lock().expect("calls lock").commits += 1;
        outcome(&self.failures.commit)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.calls.lock().expect("calls lock").rollbacks += 1;
        outcome(&self.failures.rollback)
    }
}

/// Records every port call and fails whichever steps it is told to.
#[derive(Default)]
struct MockStore {
    calls: Arc<Mutex<Calls>>,
    latest: Option<Transaction>,
    failures: Failures
}

impl MockStore {
    fn with_latest(latest: Option<Transaction>) -> Self {
        Self { latest, ..Self::default() }
    }

    fn failing(failures: Failures) -> Self {
        Self { failures, ..Self::default() }
    }

    fn begins(&self) -> usize {
        self.calls.lock().expect("calls lock").begins
    }

    fn reads(&self) -> Vec<AccountKey> {
        self.calls.lock().expect("calls lock").reads.clone()
    }

    fn saves(&self) -> Vec<Transaction> {
        self.calls.lock().expect("calls lock").saves.clone()
    }

    fn commits(&self) -> usize {
        self.calls.lock().expect("calls lock").commits
    }

    fn rollbacks(&self) -> usize {
        self.calls.lock().expect("calls lock").rollbacks
    }
}

#[async_trait]
impl AtomicUnitManager for MockStore {
    type Unit = MockUnit;

    async fn begin(&self, _context: &ExecutionContext) -> Result<MockUnit, StoreError> {
        self.calls.lock().expect("calls lock").begins += 1;
        outcome(&self.failures.begin)?;

        Ok(MockUnit {
            calls: self.calls.clone(),
            failures: self.failures.clone()
        })
    }
}

#[async_trait]
impl TransactionStore for MockStore {
    type Unit = MockUnit;

    async fn save(&self, _unit: &mut MockUnit, transaction: &Transaction) -> Result<(), StoreError> {
        self.calls.lock().expect("calls lock").saves.push(transaction.clone());
        outcome(&self.failures.save)
    }

    async fn query_latest_for_account(&self, _unit: &mut MockUnit, account_key: &AccountKey) -> Result<Option<Transaction>, StoreError> {
        self.calls.lock().expect("calls lock").reads.push(account_key.clone());

        if self.failures.stall_read {
            pending::<()>().await;
        }

        outcome(&self.failures.read)?;

        Ok(self.latest.clone())
    }
}

fn setup_service(store: MockStore) -> (TransactionService<MockStore, MockStore>, Arc<MockStore>) {
    let store = Arc::new(store);
    (TransactionService::new(store.clone(), store.clone()), store)
}

fn timestamp(value: &str) -> Result<Timestamp> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn create_transaction(key: &str, transaction_type: TransactionType, amount: &str, posted: &str) -> Result<Transaction> {
    Ok(Transaction::new(key, Decimal::from_str(amount)?, transaction_type, ACCOUNT_KEY, timestamp(posted)?))
}

fn latest_with_balance(balance: &str, posted: &str) -> Result<Option<Transaction>> {
    let mut latest = create_transaction("latest", TransactionType::Credit, balance, posted)?;
    latest.balance = Decimal::from_str(balance)?;
    Ok(Some(latest))
}

#[tokio::test]
async fn test_credit_is_saved_with_new_balance_and_committed() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(latest_with_balance("10", TIMESTAMP_1)?));
    let transaction = create_transaction("tx-2", TransactionType::Credit, "10", TIMESTAMP_2)?;

    service.process_transaction(transaction.clone(), &ExecutionContext::new()).await?;

    let mut expected = transaction;
    expected.balance = Decimal::from_str("20")?;

    assert_eq!(store.begins(), 1);
    assert_eq!(store.reads(), vec![ACCOUNT_KEY.to_string()]);
    assert_eq!(store.saves(), vec![expected]);
    assert_eq!(store.commits(), 1);
    assert_eq!(store.rollbacks(), 0);

    Ok(())
}

#[tokio::test]
async fn test_first_credit_starts_from_zero_balance() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(None));
    let transaction = create_transaction("tx-1", TransactionType::Credit, "10", TIMESTAMP_1)?;

    service.process_transaction(transaction, &ExecutionContext::new()).await?;

    assert_eq!(store.saves()[0].balance, Decimal::from_str("10")?);
    assert_eq!(store.commits(), 1);

    Ok(())
}

#[tokio::test]
async fn test_caller_supplied_balance_is_overwritten() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(latest_with_balance("10", TIMESTAMP_1)?));
    let mut transaction = create_transaction("tx-2", TransactionType::Debit, "5", TIMESTAMP_2)?;
    transaction.balance = Decimal::from_str("1000")?;

    service.process_transaction(transaction, &ExecutionContext::new()).await?;

    assert_eq!(store.saves()[0].balance, Decimal::from_str("5")?);

    Ok(())
}

#[tokio::test]
async fn test_first_debit_fails_with_insufficient_funds_and_rolls_back() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(None));
    let transaction = create_transaction("tx-1", TransactionType::Debit, "10", TIMESTAMP_2)?;

    let result = service.process_transaction(transaction, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::InsufficientFunds { .. })));
    assert!(store.saves().is_empty());
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_debit_above_balance_fails_and_rolls_back() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(latest_with_balance("10", TIMESTAMP_1)?));
    let transaction = create_transaction("tx-2", TransactionType::Debit, "100", TIMESTAMP_2)?;

    let result = service.process_transaction(transaction, &ExecutionContext::new()).await;

    assert!(result.as_ref().is_err_and(ProcessingError::is_client_error));
    assert!(matches!(result, Err(ProcessingError::InsufficientFunds { .. })));
    assert!(store.saves().is_empty());
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_ordering_is_enforced_against_latest_transaction() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(latest_with_balance("10", TIMESTAMP_1)?));
    let context = ExecutionContext::new();

    let earlier = service.process_transaction(create_transaction("tx-0", TransactionType::Credit, "1", TIMESTAMP_0)?, &context).await;
    let same = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &context).await;
    let later = service.process_transaction(create_transaction("tx-2", TransactionType::Credit, "1", TIMESTAMP_2)?, &context).await;

    assert!(matches!(earlier, Err(ProcessingError::OrderingViolation { .. })));
    assert!(matches!(same, Err(ProcessingError::DuplicateTimestamp { .. })));
    assert!(later.is_ok());
    assert_eq!(store.rollbacks(), 2);
    assert_eq!(store.commits(), 1);

    Ok(())
}

#[tokio::test]
async fn test_unrecognized_type_fails_and_rolls_back() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(latest_with_balance("10", TIMESTAMP_1)?));
    let transaction = create_transaction("tx-2", TransactionType::Unrecognized, "1", TIMESTAMP_2)?;

    let result = service.process_transaction(transaction, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::InvalidType { .. })));
    assert!(store.saves().is_empty());
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_begin_failure_is_returned_without_rollback() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        begin: Some(StoreError::Unavailable("no connection".to_string())),
        ..Failures::default()
    }));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::UnitBegin { .. })));
    assert!(store.reads().is_empty());
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 0);

    Ok(())
}

#[tokio::test]
async fn test_read_failure_rolls_back() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        read: Some(StoreError::Unavailable("read timeout".to_string())),
        ..Failures::default()
    }));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::Read { .. })));
    assert!(store.saves().is_empty());
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_save_failure_rolls_back_exactly_once() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        save: Some(StoreError::DuplicateKey { transaction_key: "tx-1".to_string() }),
        ..Failures::default()
    }));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::Save { .. })));
    assert_eq!(store.saves().len(), 1);
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_commit_conflict_is_surfaced_as_retryable() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        commit: Some(StoreError::Conflict { account_key: ACCOUNT_KEY.to_string() }),
        ..Failures::default()
    }));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &ExecutionContext::new()).await;

    assert!(matches!(result, Err(ProcessingError::Commit { .. })));
    assert!(result.is_err_and(|error| error.is_retryable()));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.rollbacks(), 0);

    Ok(())
}

#[tokio::test]
async fn test_rollback_failure_is_combined_with_original_error() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        rollback: Some(StoreError::Unavailable("connection reset".to_string())),
        ..Failures::default()
    }));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Debit, "1", TIMESTAMP_1)?, &ExecutionContext::new()).await;
    let error = result.err().ok_or_else(|| anyhow!("Debit without funds should fail"))?;

    assert!(matches!(error, ProcessingError::RollbackFailed { .. }));
    assert!(matches!(error.cause(), ProcessingError::InsufficientFunds { .. }));
    assert_eq!(error.rollback_error(), Some(&StoreError::Unavailable("connection reset".to_string())));
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_context_fails_before_beginning() -> Result<()> {
    let (service, store) = setup_service(MockStore::with_latest(None));
    let context = ExecutionContext::new();
    context.cancel();

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &context).await;

    assert!(matches!(result, Err(ProcessingError::UnitBegin { source: StoreError::Context(ContextError::Cancelled) })));
    assert_eq!(store.begins(), 0);

    Ok(())
}

#[tokio::test]
async fn test_stalled_read_is_abandoned_at_deadline_and_rolled_back() -> Result<()> {
    let (service, store) = setup_service(MockStore::failing(Failures {
        stall_read: true,
        ..Failures::default()
    }));
    let context = ExecutionContext::new().with_timeout(Duration::from_millis(50));

    let result = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_1)?, &context).await;

    assert!(matches!(result, Err(ProcessingError::Read { source: StoreError::Context(ContextError::DeadlineExceeded), .. })));
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 1);

    Ok(())
}

#[tokio::test]
async fn test_ledger_accumulates_balances_in_order() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let service = TransactionService::new(ledger.clone(), ledger.clone());
    let context = ExecutionContext::new();

    service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "10", TIMESTAMP_0)?, &context).await?;
    service.process_transaction(create_transaction("tx-2", TransactionType::Credit, "5", TIMESTAMP_1)?, &context).await?;
    service.process_transaction(create_transaction("tx-3", TransactionType::Debit, "7.5", TIMESTAMP_2)?, &context).await?;

    let balances: Vec<Decimal> = ledger.transactions().into_iter().map(|transaction| transaction.balance).collect();

    assert_eq!(balances, vec![Decimal::from_str("10")?, Decimal::from_str("15")?, Decimal::from_str("7.5")?]);

    Ok(())
}

#[tokio::test]
async fn test_rejected_transaction_leaves_ledger_untouched() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let service = TransactionService::new(ledger.clone(), ledger.clone());
    let context = ExecutionContext::new();

    service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "10", TIMESTAMP_1)?, &context).await?;
    let debit = service.process_transaction(create_transaction("tx-2", TransactionType::Debit, "100", TIMESTAMP_2)?, &context).await;
    let reused_key = service.process_transaction(create_transaction("tx-1", TransactionType::Credit, "1", TIMESTAMP_2)?, &context).await;

    assert!(matches!(debit, Err(ProcessingError::InsufficientFunds { .. })));
    assert!(matches!(reused_key, Err(ProcessingError::Save { source: StoreError::DuplicateKey { .. }, .. })));
    assert_eq!(ledger.transaction_count(), 1);
    assert_eq!(ledger.latest_for_account(ACCOUNT_KEY).map(|latest| latest.balance), Some(Decimal::from_str("10")?));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credit_and_debit_match_a_serial_order() -> Result<()> {
    for round in 0..50 {
        let ledger = Arc::new(MemoryLedger::new());
        let service = Arc::new(TransactionService::new(ledger.clone(), ledger.clone()));

        let credit = create_transaction(&format!("credit-{round}"), TransactionType::Credit, "10", TIMESTAMP_1)?;
        let debit = create_transaction(&format!("debit-{round}"), TransactionType::Debit, "5", TIMESTAMP_2)?;

        let credit_service = service.clone();
        let debit_service = service.clone();
        let credit_task = tokio::spawn(async move { credit_service.process_transaction(credit, &ExecutionContext::new()).await });
        let debit_task = tokio::spawn(async move { debit_service.process_transaction(debit, &ExecutionContext::new()).await });

        let credit_result = credit_task.await?;
        let debit_result = debit_task.await?;
        let latest = ledger.latest_for_account(ACCOUNT_KEY).ok_or_else(|| anyhow!("Credit should always commit"))?;

        assert!(credit_result.is_ok());

        match debit_result {
            Ok(()) => {
                assert_eq!(latest.balance, Decimal::from_str("5")?);
                assert_eq!(ledger.transaction_count(), 2);
            }
            Err(error) => {
                assert!(matches!(error.cause(), ProcessingError::InsufficientFunds { .. }));
                assert_eq!(latest.balance, Decimal::from_str("10")?);
                assert_eq!(ledger.transaction_count(), 1);
            }
        }
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credits_keep_a_consistent_ledger() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let service = Arc::new(TransactionService::new(ledger.clone(), ledger.clone()));
    let start = timestamp(TIMESTAMP_1)?;
    let mut tasks = Vec::new();

    for index in 0..32i64 {
        let service = service.clone();
        let transaction = Transaction::new(
            format!("tx-{index}"),
            Decimal::ONE,
            TransactionType::Credit,
            ACCOUNT_KEY,
            start + chrono::Duration::seconds(index)
        );

        tasks.push(tokio::spawn(async move {
            loop {
                match service.process_transaction(transaction.clone(), &ExecutionContext::new()).await {
                    Err(error) if error.is_retryable() => continue,
                    result => return result
                }
            }
        }));
    }

    for task in tasks {
        match task.await? {
            Ok(()) | Err(ProcessingError::OrderingViolation { .. }) => {}
            Err(error) => return Err(error.into())
        }
    }

    let rows = ledger.transactions();
    let mut expected_balance = Decimal::ZERO;

    for (position, row) in rows.iter().enumerate() {
        expected_balance += row.amount;
        assert_eq!(row.balance, expected_balance);

        if position > 0 {
            assert!(rows[position - 1].posted_timestamp < row.posted_timestamp);
        }
    }

    assert!(!rows.is_empty());

    Ok(())
}
