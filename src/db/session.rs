//! Session capability and the engine seams behind it.
//!
//! The resolver and the transaction executor only speak to the database through these
//! traits:
//! - [`Session`] is one physical connection bound to a [`Context`].
//! - [`EngineGroup`] hands out master- or slave-routed sessions for one logical name.
//! - [`Connector`] builds an engine group from a [`DbConfig`].
//!
//! The default implementation lives in [`crate::db::sqlx_engine`]; tests plug in fakes.

use crate::config::DbConfig;
use crate::db::mapper::NamingConvention;
use crate::error::DbResult;
use crate::models::{Context, JsonRow, QueryParam};
use async_trait::async_trait;
use std::sync::Arc;

/// A handle to one connection plus the context it runs under.
///
/// Whoever created a session owns it and must `close` it. `close` on a session with an
/// open transaction rolls that transaction back.
#[async_trait]
pub trait Session: Send {
    /// The context this session was opened with.
    fn context(&self) -> &Context;

    /// Whether `begin` succeeded and neither `commit` nor `rollback` has run since.
    fn in_transaction(&self) -> bool;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    /// Run a write statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64>;

    /// Run a read statement and return every row.
    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>>;
}

/// One master and zero or more slaves sharing pool and naming settings.
pub trait EngineGroup: Send + Sync + std::fmt::Debug {
    /// Open a session routed to the master.
    fn master(&self, ctx: &Context) -> Box<dyn Session>;

    /// Open a session routed to a slave; the master when no slave is configured.
    fn slave(&self, ctx: &Context) -> Box<dyn Session>;

    /// Naming convention configured for this group.
    fn naming(&self) -> NamingConvention;

    fn slave_count(&self) -> usize;
}

/// Builds engine groups for the resolver.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build a group for `name`, applying the pool settings, naming convention,
    /// statement logger and flags from `config`.
    async fn connect(&self, name: &str, config: &DbConfig) -> DbResult<Arc<dyn EngineGroup>>;
}
