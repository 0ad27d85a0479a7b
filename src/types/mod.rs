mod context;
mod errors;

use chrono::{DateTime, Utc};

pub use context::ExecutionContext;
pub use errors::ContextError;

pub type AccountKey = String;
pub type TransactionKey = String;
pub type Timestamp = DateTime<Utc>;
