//! Shared collaborators of the command facade and every session task.

use crate::catalog::Catalog;
use crate::checkpoint::CheckpointStore;
use crate::config::CrowdplayConfig;
use crate::registry::SessionRegistry;
use crowdplay_env::{BallotTransport, EmulatorFactory, SessionContext, SessionId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Everything a session controller needs besides its own session.
///
/// Generic over the context and transport implementations, allowing the
/// same controller code to run in production (tokio, chat bot) or in the
/// simulation harness.
pub struct Services<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    /// Clock and task spawning
    pub ctx: Arc<Ctx>,

    /// Chat service
    pub transport: Arc<T>,

    /// Emulator launcher
    pub factory: Arc<dyn EmulatorFactory>,

    /// Checkpoint persistence
    pub store: Arc<dyn CheckpointStore>,

    /// Active sessions
    pub registry: Arc<SessionRegistry>,

    /// Effective configuration
    pub config: CrowdplayConfig,

    /// Effective catalog
    pub catalog: Catalog,

    /// Sessions exempt from idle expiry
    pub exempt: HashSet<SessionId>,
}

impl<Ctx, T> Services<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    pub fn new(
        ctx: Arc<Ctx>,
        transport: Arc<T>,
        factory: Arc<dyn EmulatorFactory>,
        store: Arc<dyn CheckpointStore>,
        config: CrowdplayConfig,
    ) -> Self {
        let catalog = config.catalog();
        let exempt = config.exempt_set();
        Self {
            ctx,
            transport,
            factory,
            store,
            registry: SessionRegistry::shared(),
            config,
            catalog,
            exempt,
        }
    }

    /// Publishes the active session count. Best-effort.
    pub async fn announce_presence(&self) {
        let active = self.registry.len();
        if let Err(e) = self.transport.update_presence(active).await {
            warn!(active, error = %e, "presence update failed");
        }
    }

    /// Sends a notice to a session's channel. Best-effort.
    pub async fn notice(&self, session: SessionId, text: &str) {
        if let Err(e) = self.transport.notify(session, text).await {
            warn!(session = %session, error = %e, "notice delivery failed");
        }
    }
}
