//! Execution context for sessions.
//!
//! A `Context` travels with every session: it carries the caller's cancellation token,
//! an optional deadline, and a correlation id used in statement logs.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    id: String,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            id: generate_context_id(),
        }
    }

    /// Derive a context that also expires after `timeout`.
    ///
    /// The earlier of the parent's deadline and the new one wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
            id: self.id.clone(),
        }
    }

    /// Derive a context cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            id: self.id.clone(),
        }
    }

    /// Replace the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check the context before starting `operation`.
    pub fn check(&self, operation: &str) -> DbResult<()> {
        if self.token.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(DbError::timeout(operation));
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or its deadline passes.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        self.check(operation)?;

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(DbError::cancelled(operation)),
                    res = tokio::time::timeout_at(deadline, fut) => {
                        res.unwrap_or_else(|_| Err(DbError::timeout(operation)))
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(DbError::cancelled(operation)),
                    res = fut => res,
                }
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

fn generate_context_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
