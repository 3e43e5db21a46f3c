//! Statement logging adapter.
//!
//! Every engine group carries one `StatementLogger` bound to the record it was built
//! from. Sessions report each statement to it after execution.

use crate::config::DbConfig;
use crate::error::DbError;
use crate::models::{Context, QueryParam};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct StatementLogger {
    name: String,
    username: String,
    schema: String,
    show_sql: bool,
    enable_session_id: bool,
}

impl StatementLogger {
    /// Bind a logger to the connection record of `name`.
    pub fn new(name: impl Into<String>, config: &DbConfig) -> Self {
        Self {
            name: name.into(),
            username: config.username().to_string(),
            schema: config.schema().to_string(),
            show_sql: config.show_sql,
            enable_session_id: config.enable_session_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn show_sql(&self) -> bool {
        self.show_sql
    }

    /// Report a finished statement.
    ///
    /// The statement itself is only logged when `show_sql` is on; failures are always logged.
    pub fn after_sql(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
        elapsed: Duration,
        err: Option<&DbError>,
    ) {
        let session_id = self.enable_session_id.then(|| ctx.id());

        if self.show_sql {
            let duration_ms = elapsed.as_millis() as u64;
            if params.is_empty() {
                info!(
                    target: "db_access::sql",
                    connection = %self.name,
                    sql = %sql,
                    username = %self.username,
                    schema = %self.schema,
                    duration_ms,
                    session_id,
                    "Statement executed"
                );
            } else {
                info!(
                    target: "db_access::sql",
                    connection = %self.name,
                    sql = %sql,
                    username = %self.username,
                    schema = %self.schema,
                    duration_ms,
                    arguments = ?params,
                    session_id,
                    "Statement executed"
                );
            }
        }

        if let Some(e) = err {
            error!(
                target: "db_access::sql",
                connection = %self.name,
                sql = %sql,
                session_id,
                error = %e,
                "Statement failed"
            );
        }
    }
}
