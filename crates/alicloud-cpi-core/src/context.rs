//! Per-call operation context

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Ephemeral context created for each incoming operation
///
/// Carries the operation name used in every error and log line, plus the
/// caller's cancellation signal and optional overall deadline. Every provider
/// call and every sleep in the lifecycle runner races
/// [`OperationContext::cancelled`].
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: &'static str,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes once the token is cancelled or the deadline passes
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}
