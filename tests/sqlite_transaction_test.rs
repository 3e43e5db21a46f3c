//! End-to-end tests against a SQLite file through the sqlx engine.
//!
//! Tests verify that:
//! - Committed handlers are visible to later sessions
//! - A failing handler leaves no partial writes
//! - Statements outside a transaction autocommit
//! - Configuration loaded from YAML reaches the engine
//! - Cancelling the context mid-run leaves no rows behind
//! - An executor nested on an open session joins the outer transaction

use db_access::config::{ConfigSet, DbConfig};
use db_access::db::{Service, Session, Transaction, TransactionPool};
use db_access::models::Context;
use db_access::{ConnectionManager, DbError, DbResult};
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a SQLite file with an orders table and one stocked item.
async fn setup_db() -> (Arc<ConnectionManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();

    let mut configs = ConfigSet::default();
    configs.insert("db", DbConfig::new("sqlite", [path]));
    let manager = Arc::new(ConnectionManager::new(configs).await.unwrap());

    let ctx = Context::background();
    let mut session = manager.master(&ctx).await;
    session
        .execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, sku TEXT NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    session
        .execute(
            "CREATE TABLE inventory (sku TEXT PRIMARY KEY, qty INTEGER NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    session
        .execute("INSERT INTO inventory (sku, qty) VALUES (?, ?)", &["A".into(), 1.into()])
        .await
        .unwrap();
    session.close().await.unwrap();

    (manager, temp_file)
}

async fn insert_order(session: &mut dyn Session, id: i64) -> DbResult<()> {
    session
        .execute("INSERT INTO orders (id, sku) VALUES (?, ?)", &[id.into(), "A".into()])
        .await?;
    Ok(())
}

async fn update_inventory(session: &mut dyn Session) -> DbResult<()> {
    let rows = session
        .query("SELECT qty FROM inventory WHERE sku = ?", &["A".into()])
        .await?;
    let qty = rows
        .first()
        .and_then(|row| row.get("qty"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if qty < 1 {
        return Err(DbError::handler("insufficient inventory"));
    }
    session
        .execute("UPDATE inventory SET qty = qty - 1 WHERE sku = ?", &["A".into()])
        .await?;
    Ok(())
}

async fn count_orders(manager: &ConnectionManager) -> i64 {
    let mut session = manager.slave(&Context::background()).await;
    let rows = session
        .query("SELECT id FROM orders", &[])
        .await
        .unwrap();
    session.close().await.unwrap();
    rows.len() as i64
}

#[tokio::test]
async fn test_order_and_inventory_commit_together() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));

    let mut tx = pool
        .acquire()
        .add(|_, session| Box::pin(insert_order(session, 1)))
        .add(|_, session| Box::pin(update_inventory(session)));
    tx.run(&Context::background()).await.unwrap();
    tx.release();

    assert_eq!(count_orders(&manager).await, 1);

    let mut session = manager.master(&Context::background()).await;
    let rows = session
        .query("SELECT sku, qty FROM inventory", &[])
        .await
        .unwrap();
    session.close().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("sku"), Some(&json!("A")));
    assert_eq!(rows[0].get("qty"), Some(&json!(0)));
}

#[tokio::test]
async fn test_insufficient_inventory_leaves_no_order() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));

    let mut first = pool
        .acquire()
        .add(|_, session| Box::pin(insert_order(session, 1)))
        .add(|_, session| Box::pin(update_inventory(session)));
    first.run(&Context::background()).await.unwrap();
    first.release();

    let mut second = pool
        .acquire()
        .add(|_, session| Box::pin(insert_order(session, 2)))
        .add(|_, session| Box::pin(update_inventory(session)));
    let err = second.run(&Context::background()).await.unwrap_err();
    second.release();

    assert_eq!(err.to_string(), "insufficient inventory");
    assert_eq!(count_orders(&manager).await, 1);
}

#[tokio::test]
async fn test_duplicate_key_rolls_back() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));

    let mut tx = pool
        .acquire()
        .add(|_, session| Box::pin(insert_order(session, 5)))
        .add(|_, session| Box::pin(insert_order(session, 5)));
    let err = tx.run(&Context::background()).await.unwrap_err();

    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(count_orders(&manager).await, 0);
}

#[tokio::test]
async fn test_service_session_joins_transaction() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));
    let ctx = Context::background();

    let mut outer = manager.master(&ctx).await;
    let mut tx = pool
        .acquire()
        .with_session(&mut *outer)
        .add(|_, session| Box::pin(insert_order(session, 9)));
    tx.run(&ctx).await.unwrap();
    tx.release();

    let mut service = Service::new(Arc::clone(&manager)).with_session(outer);
    let mut session = service.session(&ctx).await;
    let rows = session
        .query("SELECT id FROM orders WHERE id = ?", &[9.into()])
        .await
        .unwrap();
    session.finish().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&json!(9)));

    if let Some(mut outer) = service.clean() {
        outer.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_yaml_config_reaches_engine() {
    let temp_file = NamedTempFile::new().unwrap();
    let yaml = format!(
        "db:\n  driver: sqlite\n  dsn: \"{}\"\n  show_sql: true\n  max_open: 4\n",
        temp_file.path().display()
    );
    let configs = ConfigSet::from_yaml_str(&yaml).unwrap();
    let manager = ConnectionManager::new(configs).await.unwrap();

    let group = manager.resolve("db").await;
    assert!(!Arc::ptr_eq(&group, &manager.fallback()));

    let mut session = manager.master(&Context::background()).await;
    session
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        .await
        .unwrap();
    let affected = session
        .execute("INSERT INTO t (id) VALUES (?), (?)", &[1.into(), 2.into()])
        .await
        .unwrap();
    session.close().await.unwrap();
    assert_eq!(affected, 2);
}

#[tokio::test]
async fn test_cancelled_run_leaves_no_rows() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));
    let ctx = Context::background();

    let mut tx = pool
        .acquire()
        .add(|_, session| Box::pin(insert_order(session, 1)))
        .add(|ctx, session| {
            Box::pin(async move {
                ctx.cancel();
                insert_order(session, 2).await
            })
        });
    let err = tx.run(&ctx).await.unwrap_err();
    tx.release();

    assert!(matches!(err, DbError::Cancelled { .. }));
    assert_eq!(count_orders(&manager).await, 0);
}

/// Outer handler that places the order, then reserves stock through a nested executor.
fn order_with_nested_reservation(
    pool: &Arc<TransactionPool>,
    reserve: fn(Transaction<'_>) -> Transaction<'_>,
) -> Transaction<'static> {
    let inner_pool = Arc::clone(pool);
    pool.acquire()
        .add(|_, session| Box::pin(insert_order(session, 1)))
        .add(move |ctx, session| {
            Box::pin(async move {
                let mut inner = reserve(inner_pool.acquire().with_session(session));
                let result = inner.run(ctx).await;
                inner.release();
                result
            })
        })
}

#[tokio::test]
async fn test_nested_executor_commits_with_outer() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));

    let mut tx = order_with_nested_reservation(&pool, |inner| {
        inner.add(|_, session| Box::pin(update_inventory(session)))
    });
    tx.run(&Context::background()).await.unwrap();
    tx.release();

    assert_eq!(count_orders(&manager).await, 1);
    let mut session = manager.master(&Context::background()).await;
    let rows = session
        .query("SELECT qty FROM inventory WHERE sku = ?", &["A".into()])
        .await
        .unwrap();
    session.close().await.unwrap();
    assert_eq!(rows[0].get("qty"), Some(&json!(0)));
}

#[tokio::test]
async fn test_nested_failure_rolls_back_outer() {
    let (manager, _file) = setup_db().await;
    let pool = TransactionPool::new(Arc::clone(&manager));

    let mut tx = order_with_nested_reservation(&pool, |inner| {
        inner.add(|_, _| Box::pin(async { Err::<(), _>(DbError::handler("reservation failed")) }))
    });
    let err = tx.run(&Context::background()).await.unwrap_err();
    tx.release();

    assert_eq!(err.to_string(), "reservation failed");
    assert_eq!(count_orders(&manager).await, 0);
}
