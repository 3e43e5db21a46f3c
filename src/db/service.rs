//! Base for repository-style services.
//!
//! A `Service` opens master or slave sessions through the connection manager, or reuses
//! a session bound to it so several services can share one transaction.

use crate::db::pool::ConnectionManager;
use crate::db::session::Session;
use crate::error::DbResult;
use crate::models::Context;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub struct Service {
    manager: Arc<ConnectionManager>,
    session: Option<Box<dyn Session>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("bound", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            session: None,
        }
    }

    /// Bind `session`; [`Service::session`] hands it out until [`Service::clean`].
    pub fn with_session(mut self, session: Box<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Unbind and return the bound session, if any.
    pub fn clean(&mut self) -> Option<Box<dyn Session>> {
        self.session.take()
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_some()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn master(&self, ctx: &Context) -> Box<dyn Session> {
        self.manager.master(ctx).await
    }

    pub async fn master_with(&self, ctx: &Context, name: &str) -> Box<dyn Session> {
        self.manager.master_with(ctx, name).await
    }

    pub async fn slave(&self, ctx: &Context) -> Box<dyn Session> {
        self.manager.slave(ctx).await
    }

    pub async fn slave_with(&self, ctx: &Context, name: &str) -> Box<dyn Session> {
        self.manager.slave_with(ctx, name).await
    }

    /// The bound session, or a new master session when nothing is bound.
    pub async fn session(&mut self, ctx: &Context) -> ServiceSession<'_> {
        match self.session.as_mut() {
            Some(session) => ServiceSession::Bound(&mut **session),
            None => ServiceSession::Owned(self.manager.master(ctx).await),
        }
    }
}

/// Session returned by [`Service::session`].
pub enum ServiceSession<'a> {
    /// Bound to the service; owned by whoever bound it.
    Bound(&'a mut dyn Session),
    /// Opened for this call.
    Owned(Box<dyn Session>),
}

impl ServiceSession<'_> {
    pub fn is_bound(&self) -> bool {
        matches!(self, ServiceSession::Bound(_))
    }

    /// Close the session if it was opened for this call; leave a bound one alone.
    pub async fn finish(self) -> DbResult<()> {
        match self {
            ServiceSession::Bound(_) => Ok(()),
            ServiceSession::Owned(mut session) => session.close().await,
        }
    }
}

impl<'a> Deref for ServiceSession<'a> {
    type Target = dyn Session + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            ServiceSession::Bound(session) => &**session,
            ServiceSession::Owned(session) => &**session,
        }
    }
}

impl<'a> DerefMut for ServiceSession<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            ServiceSession::Bound(session) => &mut **session,
            ServiceSession::Owned(session) => &mut **session,
        }
    }
}
