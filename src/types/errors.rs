use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum ContextError {
    #[error("Execution context error: Cancelled")]
    Cancelled,
    #[error("Execution context error: Deadline exceeded")]
    DeadlineExceeded
}
