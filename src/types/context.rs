use std::future::{pending, Future};
use std::time::Duration;

use tokio::select;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::types::ContextError;

/// Cancellation and deadline information for one call chain.
///
/// Every blocking step of a request (beginning a unit, reading, saving, committing)
/// is expected to give up once the context is cancelled or its deadline passes.
/// Clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Creates a context that is cancelled whenever this one is, but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancellation.is_cancelled() {
            return Err(ContextError::Cancelled)
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(())
        }
    }

    /// Drives `future` to completion unless the context is cancelled or expires first.
    ///
    /// The future is dropped as soon as the context gives up on it.
    pub async fn guard<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ContextError>
    {
        self.check()?;

        let expiry = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await
            }
        };

        select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ContextError::Cancelled.into()),
            _ = expiry => Err(ContextError::DeadlineExceeded.into()),
            result = future => result
        }
    }
}
