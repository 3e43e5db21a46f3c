//! Transaction executor.
//!
//! A [`Transaction`] runs an ordered list of handlers inside one database transaction:
//! all of them commit together or none do. Executors are handed out by a
//! [`TransactionPool`] and given back with [`Transaction::release`] so their handler
//! buffers get reused.
//!
//! ```ignore
//! let mut tx = pool
//!     .acquire()
//!     .add(|_ctx, session| Box::pin(async move {
//!         session.execute("INSERT INTO orders (id) VALUES (?)", &[1.into()]).await?;
//!         Ok(())
//!     }))
//!     .add(|_ctx, session| Box::pin(async move {
//!         session.execute("UPDATE inventory SET qty = qty - 1 WHERE sku = ?", &["A".into()]).await?;
//!         Ok(())
//!     }));
//! let result = tx.run(&ctx).await;
//! tx.release();
//! ```

use crate::config::DEFAULT_CONNECTION_NAME;
use crate::db::pool::ConnectionManager;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

/// Unit of work run inside a transaction.
///
/// Receives the context passed to [`Transaction::run`] and the transactional session.
pub type TransactionHandler = Box<
    dyn for<'a> FnOnce(&'a Context, &'a mut dyn Session) -> BoxFuture<'a, DbResult<()>> + Send,
>;

/// Box a closure as a [`TransactionHandler`].
pub fn handler<F>(f: F) -> TransactionHandler
where
    F: for<'a> FnOnce(&'a Context, &'a mut dyn Session) -> BoxFuture<'a, DbResult<()>>
        + Send
        + 'static,
{
    Box::new(f)
}

/// Idle handler buffers kept for reuse.
const MAX_IDLE_EXECUTORS: usize = 64;

/// Reusable supply of [`Transaction`] executors.
pub struct TransactionPool {
    manager: Arc<ConnectionManager>,
    idle: Mutex<Vec<Vec<TransactionHandler>>>,
}

impl std::fmt::Debug for TransactionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPool")
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

impl TransactionPool {
    pub fn new(manager: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Take a fresh executor: no handlers, no session.
    pub fn acquire(self: &Arc<Self>) -> Transaction<'static> {
        let handlers = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();

        Transaction {
            handlers,
            session: None,
            connection: DEFAULT_CONNECTION_NAME.to_string(),
            session_created: false,
            session_opened: false,
            pool: Arc::clone(self),
        }
    }

    /// Number of released executors waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn put_back(&self, mut handlers: Vec<TransactionHandler>) {
        handlers.clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_EXECUTORS {
            idle.push(handlers);
        }
    }
}

/// Session used by a run: created by the executor or supplied by the caller.
enum SessionHandle<'s> {
    Created(Box<dyn Session>),
    Borrowed(&'s mut dyn Session),
}

impl SessionHandle<'_> {
    fn get(&mut self) -> &mut dyn Session {
        match self {
            SessionHandle::Created(session) => &mut **session,
            SessionHandle::Borrowed(session) => &mut **session,
        }
    }
}

/// Ordered handlers run atomically on one session.
///
/// `'s` is the lifetime of a caller-supplied session; executors that open their own
/// session are `Transaction<'static>`.
pub struct Transaction<'s> {
    handlers: Vec<TransactionHandler>,
    session: Option<SessionHandle<'s>>,
    connection: String,
    session_created: bool,
    session_opened: bool,
    pool: Arc<TransactionPool>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handlers", &self.handlers.len())
            .field("has_session", &self.session.is_some())
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl<'s> Transaction<'s> {
    /// Append a handler. Handlers run in the order they were added.
    pub fn add<F>(mut self, handler: F) -> Self
    where
        F: for<'a> FnOnce(&'a Context, &'a mut dyn Session) -> BoxFuture<'a, DbResult<()>>
            + Send
            + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Append already boxed handlers in iteration order.
    pub fn extend<I>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = TransactionHandler>,
    {
        self.handlers.extend(handlers);
        self
    }

    /// Run on a session owned by the caller.
    ///
    /// The executor begins and commits or rolls back the transaction on it but never
    /// closes it. When the session already has an open transaction the handlers join
    /// it and commit or rollback is left to whoever began it.
    pub fn with_session<'t>(self, session: &'t mut dyn Session) -> Transaction<'t> {
        Transaction {
            handlers: self.handlers,
            session: Some(SessionHandle::Borrowed(session)),
            connection: self.connection,
            session_created: false,
            session_opened: false,
            pool: self.pool,
        }
    }

    /// Logical connection name used when the executor opens its own session.
    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.connection = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Run every handler in one transaction.
    ///
    /// Rolls back on the first handler error and returns it; commits otherwise, in which
    /// case a commit failure becomes the result. A panicking handler is caught, the
    /// transaction rolled back, and [`DbError::Panicked`] returned. A session opened here
    /// is closed before returning. Handlers are consumed.
    pub async fn run(&mut self, ctx: &Context) -> DbResult<()> {
        let mut result = match AssertUnwindSafe(self.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(fatal = true, panic = %message, "Transaction handler panicked");
                Err(DbError::panicked(message))
            }
        };

        self.finalize(&mut result).await;
        result
    }

    /// Hand the executor back to its pool.
    pub fn release(self) {
        self.pool.put_back(self.handlers);
    }

    async fn execute(&mut self, ctx: &Context) -> DbResult<()> {
        if self.session.is_none() {
            let session = self.pool.manager.master_with(ctx, &self.connection).await;
            self.session = Some(SessionHandle::Created(session));
            self.session_created = true;
            debug!(connection = %self.connection, "Session created");
        }

        let session = match self.session.as_mut() {
            Some(handle) => handle.get(),
            None => return Err(DbError::internal("transaction has no session")),
        };

        // Nested in an outer transaction: its owner commits or rolls back.
        if session.in_transaction() {
            debug!(handlers = self.handlers.len(), "Joining open transaction");
        } else {
            session.begin().await?;
            self.session_opened = true;
            debug!(handlers = self.handlers.len(), "Session opened");
        }

        for handler in self.handlers.drain(..) {
            handler(ctx, &mut *session).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self, result: &mut DbResult<()>) {
        if self.session_opened {
            self.session_opened = false;
            if let Some(handle) = self.session.as_mut() {
                let session = handle.get();
                if let Err(e) = result {
                    match session.rollback().await {
                        Ok(()) => info!(error = %e, "Transaction rolled back"),
                        Err(rollback_err) => {
                            error!(error = %e, rollback_error = %rollback_err, "Transaction rollback failed")
                        }
                    }
                } else if let Err(commit_err) = session.commit().await {
                    error!(error = %commit_err, "Transaction commit failed");
                    *result = Err(commit_err);
                } else {
                    debug!("Transaction committed");
                }
            }
        }

        if self.session_created {
            self.session_created = false;
            if let Some(mut handle) = self.session.take() {
                match handle.get().close().await {
                    Ok(()) => debug!("Session closed"),
                    Err(e) => error!(error = %e, "Session close failed"),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
