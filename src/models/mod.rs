//! Data models shared across the crate.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod context;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, masked_connection_string};
pub use context::Context;
pub use query::{JsonRow, QueryParam};
