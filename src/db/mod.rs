//! Database access layer.
//!
//! - `session`: the session capability and the engine seams behind it
//! - `sqlx_engine`: sqlx-backed engine groups and sessions
//! - `pool`: connection group resolution and caching
//! - `transaction`: atomic multi-handler execution and its reuse pool
//! - `service`: base for services sharing sessions
//! - `mapper`, `logger`: naming conventions and statement logging

pub mod logger;
pub mod mapper;
pub mod params;
pub mod pool;
pub mod service;
pub mod session;
pub mod sqlx_engine;
pub mod transaction;
pub mod types;

pub use logger::StatementLogger;
pub use mapper::NamingConvention;
pub use pool::{ConnectionManager, FALLBACK_GROUP_NAME};
pub use service::{Service, ServiceSession};
pub use session::{Connector, EngineGroup, Session};
pub use sqlx_engine::{DbPool, PoolSettings, SqlxConnector, SqlxEngineGroup, SqlxSession};
pub use transaction::{Transaction, TransactionHandler, TransactionPool, handler};
