//! db-access - run one statement against a named connection group.

use clap::Parser;
use db_access::config::Config;
use db_access::db::{ConnectionManager, TransactionPool};
use db_access::models::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only results.
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        name = %config.name,
        "Starting db-access v{}",
        env!("CARGO_PKG_VERSION")
    );

    let configs = config.load_config_set()?;
    let manager = Arc::new(ConnectionManager::new(configs).await?);

    let ctx = Context::background().with_timeout(config.timeout_duration());
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let result = if config.execute {
        execute(&manager, &ctx, &config).await
    } else {
        query(&manager, &ctx, &config).await
    };

    if let Err(e) = result {
        error!(error = %e, "Statement failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Suggestion: {suggestion}");
        }
        return Err(e.into());
    }

    Ok(())
}

async fn query(
    manager: &ConnectionManager,
    ctx: &Context,
    config: &Config,
) -> db_access::DbResult<()> {
    let mut session = if config.slave {
        manager.slave_with(ctx, &config.name).await
    } else {
        manager.master_with(ctx, &config.name).await
    };

    let result = session.query(&config.sql, &[]).await;
    if let Err(e) = session.close().await {
        error!(error = %e, "Session close failed");
    }

    let rows = result?;
    info!(rows = rows.len(), "Query finished");
    let output = serde_json::to_string_pretty(&rows)
        .map_err(|e| db_access::DbError::internal(format!("Failed to encode rows: {e}")))?;
    println!("{output}");
    Ok(())
}

async fn execute(
    manager: &Arc<ConnectionManager>,
    ctx: &Context,
    config: &Config,
) -> db_access::DbResult<()> {
    let pool = TransactionPool::new(Arc::clone(manager));
    let affected = Arc::new(AtomicU64::new(0));

    let sql = config.sql.clone();
    let counter = Arc::clone(&affected);
    let mut tx = pool.acquire().on(config.name.clone()).add(move |_, session| {
        Box::pin(async move {
            let rows = session.execute(&sql, &[]).await?;
            counter.store(rows, Ordering::Relaxed);
            Ok::<(), db_access::DbError>(())
        })
    });

    let result = tx.run(ctx).await;
    tx.release();
    result?;

    let rows = affected.load(Ordering::Relaxed);
    info!(rows_affected = rows, "Statement committed");
    println!("{rows}");
    Ok(())
}
