//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::engine::ScriptedEmulatorFactory;
use crate::transport::ScriptedTransport;

use crowdplay_core::{
    Catalog, CheckpointError, CheckpointKey, CheckpointStore, CommandFacade, ConfigError,
    CrowdplayConfig, FileCheckpointStore, MemoryCheckpointStore, RoundConfig, Services,
    SessionStatus, DEFAULT_WARMUP_TICKS,
};
use crowdplay_env::{AuthLevel, CallerId, EnvError, SessionId};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;

/// Caller granted admin rights in every world.
pub const ADMIN: CallerId = CallerId(1);

/// Caller with no rights.
pub const STRANGER: CallerId = CallerId(2);

/// Harness setup failures.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("scratch directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment: {0}")]
    Env(#[from] EnvError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("vote rate {0} is not a valid Poisson mean")]
    VoteRate(f64),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Round and voting parameters
    pub round: RoundConfig,

    /// Mean extra votes per action per poll; `None` for a silent crowd
    pub voter_mean: Option<f64>,

    /// Sessions exempt from idle expiry
    pub exempt: Vec<SessionId>,

    /// Keep checkpoints as files under the scratch directory instead of
    /// in memory
    pub file_checkpoints: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            round: RoundConfig::default(),
            voter_mean: None,
            exempt: Vec::new(),
            file_checkpoints: false,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_idle_expiry(mut self, polls: Option<u32>) -> Self {
        self.round.idle_expiry_polls = polls;
        self
    }

    pub fn with_voter(mut self, mean: f64) -> Self {
        self.voter_mean = Some(mean);
        self
    }

    pub fn with_exempt(mut self, session: SessionId) -> Self {
        self.exempt.push(session);
        self
    }

    pub fn with_file_checkpoints(mut self, enabled: bool) -> Self {
        self.file_checkpoints = enabled;
        self
    }
}

/// A complete crowdplay deployment on scripted adapters.
///
/// Default checkpoints for the built-in catalog are primed into a scratch
/// directory that is removed when the world is dropped. File-backed
/// session checkpoints live in its `saves/` subdirectory.
pub struct SimWorld {
    pub context: Arc<SimContext>,
    pub transport: Arc<ScriptedTransport>,
    pub factory: Arc<ScriptedEmulatorFactory>,
    pub store: Arc<dyn CheckpointStore>,
    pub facade: CommandFacade<SimContext, ScriptedTransport>,
    root: TempDir,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let voter_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let root = tempfile::Builder::new()
            .prefix(&format!("crowdplay-sim-{}-", config.seed))
            .tempdir()?;

        let factory = Arc::new(ScriptedEmulatorFactory::new());
        let catalog = Catalog::builtin().rooted_at(root.path());
        catalog.prime_default_checkpoints(&*factory, DEFAULT_WARMUP_TICKS)?;

        let mut transport = ScriptedTransport::new();
        if let Some(mean) = config.voter_mean {
            transport = transport.with_voter(voter_seed, mean)?;
        }
        transport.grant(ADMIN, AuthLevel::Admin);
        let transport = Arc::new(transport);

        let mut crowdplay = CrowdplayConfig::default()
            .with_round(config.round)
            .with_catalog(catalog)
            .with_checkpoint_dir(root.path().join("saves"));
        for session in config.exempt {
            crowdplay = crowdplay.with_exempt_session(session);
        }
        crowdplay.validate()?;

        let context = SimContext::shared(context_seed);
        let store: Arc<dyn CheckpointStore> = if config.file_checkpoints {
            Arc::new(FileCheckpointStore::open(&crowdplay.checkpoint_dir)?)
        } else {
            Arc::new(MemoryCheckpointStore::new())
        };
        let services = Services::new(
            context.clone(),
            transport.clone(),
            factory.clone(),
            store.clone(),
            crowdplay,
        );

        Ok(Self {
            context,
            transport,
            factory,
            store,
            facade: CommandFacade::new(Arc::new(services)),
            root,
        })
    }

    pub fn services(&self) -> &Arc<Services<SimContext, ScriptedTransport>> {
        self.facade.services()
    }

    /// Scratch directory holding ROMs, default checkpoints and file saves.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Sends a chat line as the admin and returns the notice, if any.
    pub async fn command(&self, session: SessionId, line: &str) -> Option<String> {
        self.facade.dispatch(ADMIN, session, line).await
    }

    /// Lets session tasks run until `done` holds or `max_steps` scheduler
    /// turns have passed. Returns whether `done` held.
    pub async fn run_until<F>(&self, max_steps: usize, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        done(self)
    }

    /// Runs until `session` has published `count` ballots in total.
    pub async fn run_ballots(&self, session: SessionId, count: usize, max_steps: usize) -> bool {
        self.run_until(max_steps, |w| w.transport.ballot_count(session) >= count)
            .await
    }

    /// Runs until `session` is gone from the registry.
    pub async fn run_to_exit(&self, session: SessionId, max_steps: usize) -> bool {
        self.run_until(max_steps, |w| !w.is_active(session)).await
    }

    pub fn is_active(&self, session: SessionId) -> bool {
        self.services().registry.contains(session)
    }

    pub fn status(&self, session: SessionId) -> Option<SessionStatus> {
        self.services()
            .registry
            .lookup(session)
            .ok()
            .map(|h| h.status())
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.services().registry.list_active()
    }

    /// The stored checkpoint of `session` playing `environment`.
    pub fn checkpoint(&self, environment: &str, session: SessionId) -> Option<Vec<u8>> {
        self.store
            .load(&CheckpointKey::new(environment, session))
            .ok()
    }

    /// Number of session checkpoints in the store, over every session that
    /// published a ballot and every catalog environment.
    pub fn checkpoint_count(&self) -> usize {
        let sessions: BTreeSet<SessionId> =
            self.transport.published().iter().map(|b| b.session).collect();
        let catalog = &self.services().catalog;
        sessions
            .iter()
            .flat_map(|s| catalog.iter().map(move |env| CheckpointKey::new(&env.name, *s)))
            .filter(|key| self.store.exists(key))
            .count()
    }

    /// The primed default checkpoint of `environment`.
    pub fn default_checkpoint(&self, environment: &str) -> Option<Vec<u8>> {
        self.services()
            .catalog
            .get(environment)?
            .read_default_checkpoint()
            .ok()
    }
}
