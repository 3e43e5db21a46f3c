//! Connection group management.
//!
//! `ConnectionManager` maps logical connection names to engine groups. Groups are built
//! on first use and cached for the life of the manager. Resolution never fails: a name
//! without a record, or whose group cannot be built, resolves to the fallback group
//! built from the hardcoded defaults.

use crate::config::{ConfigSet, DEFAULT_CONNECTION_NAME, DbConfig};
use crate::db::session::{Connector, EngineGroup, Session};
use crate::db::sqlx_engine::SqlxConnector;
use crate::error::DbResult;
use crate::models::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Name the fallback group is built under.
pub const FALLBACK_GROUP_NAME: &str = "default";

pub struct ConnectionManager {
    configs: ConfigSet,
    groups: RwLock<HashMap<String, Arc<dyn EngineGroup>>>,
    connector: Arc<dyn Connector>,
    fallback: Arc<dyn EngineGroup>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("configs", &self.configs)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager backed by sqlx pools.
    pub async fn new(configs: ConfigSet) -> DbResult<Self> {
        Self::with_connector(configs, Arc::new(SqlxConnector)).await
    }

    /// Create a manager using `connector` for every group, the fallback included.
    pub async fn with_connector(configs: ConfigSet, connector: Arc<dyn Connector>) -> DbResult<Self> {
        let fallback = connector
            .connect(FALLBACK_GROUP_NAME, &DbConfig::fallback())
            .await?;
        Ok(Self::with_fallback(configs, connector, fallback))
    }

    /// Create a manager with an explicit fallback group.
    pub fn with_fallback(
        configs: ConfigSet,
        connector: Arc<dyn Connector>,
        fallback: Arc<dyn EngineGroup>,
    ) -> Self {
        info!(names = configs.len(), "Connection manager created");
        Self {
            configs,
            groups: RwLock::new(HashMap::new()),
            connector,
            fallback,
        }
    }

    /// Return the engine group for `name`, building it on first use.
    ///
    /// Falls back to the default group when `name` has no record or its group fails to
    /// build. Failed builds are not cached, so a later call tries again.
    pub async fn resolve(&self, name: &str) -> Arc<dyn EngineGroup> {
        {
            let groups = self.groups.read().await;
            if let Some(group) = groups.get(name) {
                debug!(name = %name, "Reusing engine group");
                return Arc::clone(group);
            }
        }

        let Some(config) = self.configs.get(name) else {
            warn!(name = %name, "Engine group config not specified, using fallback");
            return Arc::clone(&self.fallback);
        };

        // Build under the write lock so concurrent first lookups construct only once.
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get(name) {
            debug!(name = %name, "Reusing engine group");
            return Arc::clone(group);
        }

        match self.connector.connect(name, config).await {
            Ok(group) => {
                info!(
                    name = %name,
                    driver = %config.driver,
                    slaves = group.slave_count(),
                    "Engine group created"
                );
                groups.insert(name.to_string(), Arc::clone(&group));
                group
            }
            Err(e) => {
                error!(name = %name, error = %e, "Engine group create error, using fallback");
                Arc::clone(&self.fallback)
            }
        }
    }

    /// Open a master session on the default connection name.
    pub async fn master(&self, ctx: &Context) -> Box<dyn Session> {
        self.master_with(ctx, DEFAULT_CONNECTION_NAME).await
    }

    /// Open a master session on `name`.
    pub async fn master_with(&self, ctx: &Context, name: &str) -> Box<dyn Session> {
        self.resolve(name).await.master(ctx)
    }

    /// Open a slave session on the default connection name.
    pub async fn slave(&self, ctx: &Context) -> Box<dyn Session> {
        self.slave_with(ctx, DEFAULT_CONNECTION_NAME).await
    }

    /// Open a slave session on `name`.
    pub async fn slave_with(&self, ctx: &Context, name: &str) -> Box<dyn Session> {
        self.resolve(name).await.slave(ctx)
    }

    /// The group handed out for unresolvable names.
    pub fn fallback(&self) -> Arc<dyn EngineGroup> {
        Arc::clone(&self.fallback)
    }

    pub fn configs(&self) -> &ConfigSet {
        &self.configs
    }

    /// Whether a group for `name` has been built and cached.
    pub async fn is_cached(&self, name: &str) -> bool {
        self.groups.read().await.contains_key(name)
    }

    /// Number of cached groups.
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}
