#[cfg(test)]
mod tests;
mod transaction_service;

pub use transaction_service::TransactionService;
