//! Instrumented in-memory engine shared by the integration tests.
//!
//! Every session of a `FakeConnector` writes into one `FakeDb`. Statements run inside a
//! transaction stay pending until commit; rollback and close discard them.

#![allow(dead_code)]

use async_trait::async_trait;
use db_access::config::{ConfigSet, DbConfig};
use db_access::db::{Connector, EngineGroup, NamingConvention, Session};
use db_access::models::{Context, JsonRow, QueryParam};
use db_access::{ConnectionManager, DbError, DbResult};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Counters {
    pub sessions: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    /// (sessions, begins, commits, rollbacks, closes)
    pub fn snapshot(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.sessions.load(Ordering::SeqCst),
            self.begins.load(Ordering::SeqCst),
            self.commits.load(Ordering::SeqCst),
            self.rollbacks.load(Ordering::SeqCst),
            self.closes.load(Ordering::SeqCst),
        )
    }
}

#[derive(Debug, Default)]
pub struct FakeDb {
    pub counters: Counters,
    committed: Mutex<Vec<String>>,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    fail_on: Mutex<Option<String>>,
}

impl FakeDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `execute` fail for statements containing `fragment`.
    pub fn fail_statements_containing(&self, fragment: &str) {
        *self.fail_on.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }
}

pub struct FakeSession {
    db: Arc<FakeDb>,
    ctx: Context,
    pending: Option<Vec<String>>,
    closed: bool,
}

impl FakeSession {
    fn check_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::transaction("session is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.db.counters.begins.fetch_add(1, Ordering::SeqCst);
        if self.pending.is_some() {
            return Err(DbError::transaction("transaction already open"));
        }
        if self.db.fail_begin.load(Ordering::SeqCst) {
            return Err(DbError::transaction("begin refused"));
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.db.counters.commits.fetch_add(1, Ordering::SeqCst);
        let pending = self
            .pending
            .take()
            .ok_or_else(|| DbError::transaction("no transaction to commit"))?;
        if self.db.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::transaction("commit refused"));
        }
        self.db.committed.lock().unwrap().extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.db.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.pending
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::transaction("no transaction to roll back"))
    }

    async fn close(&mut self) -> DbResult<()> {
        self.check_open()?;
        self.db.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        self.pending = None;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<u64> {
        self.check_open()?;
        self.ctx.check("execute")?;
        if let Some(fragment) = self.db.fail_on.lock().unwrap().as_deref() {
            if sql.contains(fragment) {
                return Err(DbError::invalid_input(format!("statement rejected: {sql}")));
            }
        }
        match self.pending.as_mut() {
            Some(pending) => pending.push(sql.to_string()),
            None => self.db.committed.lock().unwrap().push(sql.to_string()),
        }
        Ok(1)
    }

    async fn query(&mut self, _sql: &str, _params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        self.check_open()?;
        Ok(self
            .db
            .committed()
            .into_iter()
            .map(|sql| {
                let mut row = JsonRow::new();
                row.insert("sql".to_string(), JsonValue::String(sql));
                row
            })
            .collect())
    }
}

#[derive(Debug)]
pub struct FakeGroup {
    pub label: String,
    db: Arc<FakeDb>,
}

impl FakeGroup {
    pub fn new(label: &str, db: Arc<FakeDb>) -> Self {
        Self {
            label: label.to_string(),
            db,
        }
    }

    pub fn open(&self, ctx: &Context) -> FakeSession {
        self.db.counters.sessions.fetch_add(1, Ordering::SeqCst);
        FakeSession {
            db: Arc::clone(&self.db),
            ctx: ctx.clone(),
            pending: None,
            closed: false,
        }
    }
}

impl EngineGroup for FakeGroup {
    fn master(&self, ctx: &Context) -> Box<dyn Session> {
        Box::new(self.open(ctx))
    }

    fn slave(&self, ctx: &Context) -> Box<dyn Session> {
        Box::new(self.open(ctx))
    }

    fn naming(&self) -> NamingConvention {
        NamingConvention::Same
    }

    fn slave_count(&self) -> usize {
        0
    }
}

/// Connector counting constructions; refuses names in `failing`.
#[derive(Debug)]
pub struct FakeConnector {
    pub db: Arc<FakeDb>,
    pub constructions: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    delay: Duration,
}

impl FakeConnector {
    pub fn new(db: Arc<FakeDb>) -> Arc<Self> {
        Arc::new(Self {
            db,
            constructions: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            delay: Duration::from_millis(20),
        })
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, name: &str, _config: &DbConfig) -> DbResult<Arc<dyn EngineGroup>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.lock().unwrap().contains(name) {
            return Err(DbError::connection(format!("cannot reach {name}"), "check the host"));
        }
        Ok(Arc::new(FakeGroup::new(name, Arc::clone(&self.db))))
    }
}

pub fn configs(names: &[&str]) -> ConfigSet {
    let mut set = ConfigSet::default();
    for name in names {
        set.insert(
            *name,
            DbConfig::new("mysql", [format!("app:pw@tcp(db-{name}:3306)/{name}")]),
        );
    }
    set
}

/// Manager over `connector` whose fallback group writes to its own `FakeDb`.
pub fn manager(
    names: &[&str],
    connector: Arc<FakeConnector>,
) -> (Arc<ConnectionManager>, Arc<FakeDb>) {
    let fallback_db = FakeDb::new();
    let fallback: Arc<dyn EngineGroup> = Arc::new(FakeGroup::new("default", Arc::clone(&fallback_db)));
    let manager = ConnectionManager::with_fallback(configs(names), connector, fallback);
    (Arc::new(manager), fallback_db)
}
