//! Database access library.
//!
//! Resolves logical connection names to cached engine groups (one master plus
//! read-only slaves) and runs ordered handlers atomically inside one transaction
//! (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, ConfigSet, DbConfig};
pub use db::{ConnectionManager, Session, Transaction, TransactionPool};
pub use error::{DbError, DbResult};
