mod actors;
mod engine;
mod models;
mod service;
mod storage;
mod types;

use std::io::{stderr, stdout};
use std::process::exit;
use std::sync::Arc;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Result;
use csv::WriterBuilder;
use tracing::{info, warn};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use crate::engine::{AsyncEngine, RunSummary};
use crate::storage::MemoryLedger;
use crate::types::ExecutionContext;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: ledger-engine [input].csv [log_level:optional] [max_retries:optional] [request_timeout_ms:optional] [backpressure:optional] > [ledger].csv");
        eprintln!("Input columns: key,amount,type,account_key,posted_timestamp (type is CREDIT or DEBIT, timestamps in RFC 3339)");
        eprintln!("Available log levels: error, warn, info, debug, trace (default: error)");
        eprintln!("Defaults: 3 retries on commit conflicts, no request timeout, backpressure of 256 queued transactions");
        exit(1);
    }

    let path = &args[1];
    let log_level = args.get(2)
        .map(|s| parse_log_level(s)).unwrap_or_else(|| LevelFilter::ERROR);

    setup_logging(log_level);

    let context = ExecutionContext::new();
    let mut engine = AsyncEngine::new(Arc::new(MemoryLedger::new()))
        .with_context(context.clone());

    if let Some(max_retries) = args.get(3).and_then(|s| parse_number::<u32>("max_retries", s)) {
        engine = engine.with_max_retries(max_retries);
    }

    if let Some(timeout) = args.get(4).and_then(|s| parse_number::<u64>("request_timeout_ms", s)) {
        engine = engine.with_request_timeout(Duration::from_millis(timeout));
    }

    if let Some(backpressure) = args.get(5).and_then(|s| parse_number::<usize>("backpressure", s)) {
        engine = engine.with_backpressure(backpressure);
    }

    let interrupt = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting transactions still in flight");
            interrupt.cancel();
        }
    });

    let timer = Instant::now();
    let summary = engine.run(path).await?;
    let duration = timer.elapsed();

    info!("Processed transactions in: {duration:?}");
    log_summary(&summary);

    if context.is_cancelled() {
        warn!("Run was interrupted, the ledger only holds transactions committed before the interruption");
    }

    let ledger = engine.ledger();
    ledger.close();
    info!("Ledger holds {} committed transactions", ledger.transaction_count());
    write_results_to_stdout(ledger)?;

    Ok(())
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Accepted: {}, rejected: {}, failed: {}, malformed: {}, retries: {}",
        summary.accepted, summary.rejected, summary.failed, summary.malformed, summary.retries
    );
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.parse::<T>() {
        Ok(number) => Some(number),
        Err(_) => {
            eprintln!("Invalid {name} '{value}', using the default");
            None
        }
    }
}

fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'error'", level);
            LevelFilter::ERROR
        }
    }
}

fn setup_logging(level: LevelFilter) {
    //NOTE: stdout carries the resulting ledger, logging goes to stderr
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(terminal_log)
        .init();
}

fn write_results_to_stdout(ledger: &MemoryLedger) -> Result<()> {
    let mut output = WriterBuilder::new().has_headers(false).from_writer(stdout().lock());

    output.write_record(["key", "amount", "type", "account_key", "posted_timestamp", "balance"])?;

    for transaction in ledger.transactions() {
        output.serialize(&transaction)?;
    }

    output.flush()?;

    Ok(())
}
