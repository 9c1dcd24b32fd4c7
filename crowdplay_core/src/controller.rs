//! The per-session control loop.
//!
//! # Round State Machine
//!
//! ```text
//!            ┌────────────────────────────────────────────────────┐
//!            ▼                                                    │
//!   RoundStart ─► Simulating ─► Capturing ─► Publishing ─► Voting ─► Applying
//!       │             │             │             │           │
//!       └─────────────┴─────────────┴─────────────┴───────────┴──► Checkpointing+Exit
//!         stop          engine        engine        publish     stop / idle /
//!                       failure       failure       exhausted   poll failure
//! ```
//!
//! Every session runs one controller in its own task. The controller is the
//! sole owner of the session's engine and checkpoint buffer; the command
//! facade reaches them only through [`SessionRequest`]s, which are served
//! while the controller waits between tally polls.

use crate::catalog::Environment;
use crate::checkpoint::CheckpointKey;
use crate::error::RoundError;
use crate::round::{assemble_artifact, simulate_round, RoundPlan};
use crate::services::Services;
use crate::session::{ActionPair, SessionHandle, SessionRequest};
use crate::vote::tally_winner;
use crowdplay_env::{
    Action, Artifact, BallotId, BallotTransport, Emulator, EnvError, SessionContext, SessionId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Body of the force-stop notice.
pub const FORCE_STOP_NOTICE: &str =
    "force stopped successfully! progress since the last save is lost.";

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// Graceful stop requested through the facade
    Stopped,
    /// A round failed
    Crashed(String),
    /// Nobody voted for too long
    Idle,
    /// Killed through the facade; no checkpoint flush
    ForceStopped,
}

impl ExitCause {
    pub fn name(&self) -> &'static str {
        match self {
            ExitCause::Stopped => "stopped",
            ExitCause::Crashed(_) => "crashed",
            ExitCause::Idle => "idle",
            ExitCause::ForceStopped => "force_stopped",
        }
    }

    /// The single terminal notice for this cause.
    pub fn notice(&self, saved: bool) -> String {
        match (self, saved) {
            (ExitCause::Stopped, true) => "> ✅ thanks for playing! state was saved.".to_string(),
            (ExitCause::Stopped, false) => {
                "> ✅ thanks for playing! (state could not be saved)".to_string()
            }
            (ExitCause::Crashed(_), true) => {
                "> ⛔ game crashed! however state was saved, restore the save using load.".to_string()
            }
            (ExitCause::Crashed(_), false) => {
                "> ⛔ game crashed and the state could not be saved!".to_string()
            }
            (ExitCause::Idle, true) => {
                "> ⛔ game has been stopped due to inactivity. saved state!".to_string()
            }
            (ExitCause::Idle, false) => {
                "> ⛔ game has been stopped due to inactivity. failed to save state!".to_string()
            }
            (ExitCause::ForceStopped, _) => format!("> ✅ {}", FORCE_STOP_NOTICE),
        }
    }
}

/// Result of the voting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoteOutcome {
    Winner(Action),
    Interrupted,
    Idle,
}

/// The mutable unit owned by a controller.
struct Session {
    handle: Arc<SessionHandle>,
    engine: Box<dyn Emulator>,
    key: CheckpointKey,
    idle_limit: Option<u32>,
    pending: ActionPair,
    checkpoint: Vec<u8>,
    idle_polls: u32,
    open_ballot: Option<BallotId>,
}

/// Drives one session from its first round to its exit.
pub struct SessionController<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    services: Arc<Services<Ctx, T>>,
    session: Session,
    requests: mpsc::Receiver<SessionRequest>,
    plan: RoundPlan,
    round_duration_ms: u32,
    rounds: u64,
}

impl<Ctx, T> SessionController<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    /// Creates a controller for a registered session.
    ///
    /// `engine` must already hold `checkpoint` as its state.
    pub fn new(
        services: Arc<Services<Ctx, T>>,
        handle: Arc<SessionHandle>,
        requests: mpsc::Receiver<SessionRequest>,
        engine: Box<dyn Emulator>,
        environment: &Environment,
        checkpoint: Vec<u8>,
    ) -> Self {
        let round = &services.config.round;
        let plan = RoundPlan::new(environment.ticks_per_round, round);
        let round_duration_ms = round.round_duration_ms(environment.ticks_per_round);
        let idle_limit = environment.idle_expiry_polls.or(round.idle_expiry_polls);

        let session = Session {
            key: CheckpointKey::new(&environment.name, handle.id()),
            handle,
            engine,
            idle_limit,
            pending: ActionPair::default(),
            checkpoint,
            idle_polls: 0,
            open_ballot: None,
        };

        Self {
            services,
            session,
            requests,
            plan,
            round_duration_ms,
            rounds: 0,
        }
    }

    fn id(&self) -> SessionId {
        self.session.handle.id()
    }

    /// Runs the session to completion and performs the exit procedure.
    pub async fn run(mut self) -> ExitCause {
        let handle = self.session.handle.clone();
        info!(ticks = self.plan.ticks, "session started");

        let cause = tokio::select! {
            biased;
            _ = handle.killed() => ExitCause::ForceStopped,
            cause = self.run_rounds() => cause,
        };

        self.finish(cause).await
    }

    async fn run_rounds(&mut self) -> ExitCause {
        loop {
            if !self.session.handle.is_running() {
                return ExitCause::Stopped;
            }

            match self.play_round().await {
                Ok(None) => {}
                Ok(Some(cause)) => return cause,
                Err(err) => {
                    self.session.handle.mark_crashed();
                    error!(round = self.rounds, error = %err, "session crashed");
                    return ExitCause::Crashed(err.to_string());
                }
            }
        }
    }

    /// One full round. `Ok(None)` means loop again.
    async fn play_round(&mut self) -> Result<Option<ExitCause>, RoundError> {
        self.rounds += 1;

        // Simulating + Capturing
        let capture = simulate_round(self.session.engine.as_mut(), self.session.pending, &self.plan)
            .map_err(RoundError::Engine)?;
        debug!(round = self.rounds, frames = capture.frames.len(), "round simulated");

        // Publishing
        self.session.checkpoint = capture.state;
        self.services
            .store
            .save(&self.session.key, &self.session.checkpoint)?;

        let artifact = assemble_artifact(capture.frames, self.round_duration_ms);
        let ballot = self.publish(&artifact).await?;
        drop(artifact);
        self.session.open_ballot = Some(ballot);

        // Voting
        match self.collect_votes(ballot).await? {
            VoteOutcome::Winner(action) => {
                // Applying
                debug!(round = self.rounds, %action, "vote resolved");
                self.session.pending = ActionPair::from(action);
                self.session.open_ballot = None;
                let id = self.id();
                if let Err(e) = self.services.transport.retract_ballot(id, ballot).await {
                    warn!(%ballot, error = %e, "failed to retract resolved ballot");
                }
                Ok(None)
            }
            VoteOutcome::Interrupted => Ok(Some(ExitCause::Stopped)),
            VoteOutcome::Idle => Ok(Some(ExitCause::Idle)),
        }
    }

    async fn publish(&mut self, artifact: &Artifact) -> Result<BallotId, RoundError> {
        let round = &self.services.config.round;
        let attempts = round.publish_attempts.max(1);
        let delay = round.publish_retry_delay();
        let mut last = EnvError::transport("ballot was never published");
        let id = self.id();

        for attempt in 1..=attempts {
            match self
                .services
                .transport
                .publish_ballot(id, artifact, &Action::MENU)
                .await
            {
                Ok(ballot) => {
                    debug!(%ballot, attempt, frames = artifact.len(), "ballot published");
                    return Ok(ballot);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "ballot publish failed");
                    last = e;
                    if attempt < attempts {
                        self.services.ctx.sleep(delay).await;
                    }
                }
            }
        }

        Err(RoundError::PublishExhausted { attempts, last })
    }

    async fn collect_votes(&mut self, ballot: BallotId) -> Result<VoteOutcome, RoundError> {
        let interval = self.services.config.round.poll_interval();
        let id = self.id();

        loop {
            if !self.session.handle.is_running() {
                return Ok(VoteOutcome::Interrupted);
            }
            if self.idle_expired() {
                info!(idle_polls = self.session.idle_polls, "idle threshold reached");
                return Ok(VoteOutcome::Idle);
            }

            self.wait_serving_requests(interval).await;
            if !self.session.handle.is_running() {
                return Ok(VoteOutcome::Interrupted);
            }

            let tallies = self
                .services
                .transport
                .poll_tallies(id, ballot)
                .await
                .map_err(RoundError::Transport)?;

            match tally_winner(&Action::MENU, &tallies) {
                Some(action) => {
                    self.session.idle_polls = 0;
                    return Ok(VoteOutcome::Winner(action));
                }
                None => self.session.idle_polls += 1,
            }
        }
    }

    fn idle_expired(&self) -> bool {
        match self.session.idle_limit {
            Some(limit) => {
                !self.services.exempt.contains(&self.id()) && self.session.idle_polls >= limit
            }
            None => false,
        }
    }

    /// Sleeps for `duration`, serving facade requests as they arrive.
    async fn wait_serving_requests(&mut self, duration: Duration) {
        let ctx = self.services.ctx.clone();
        let mut sleep = ctx.sleep(duration);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                request = self.requests.recv() => match request {
                    Some(request) => self.serve(request),
                    None => {
                        (&mut sleep).await;
                        return;
                    }
                },
            }
        }
    }

    fn serve(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Save { reply } => {
                let result = self
                    .services
                    .store
                    .save(&self.session.key, &self.session.checkpoint);
                match &result {
                    Ok(()) => info!(key = %self.session.key, "checkpoint saved on request"),
                    Err(e) => warn!(key = %self.session.key, error = %e, "requested save failed"),
                }
                let _ = reply.send(result);
            }
            SessionRequest::ReadMemory { address, reply } => {
                let _ = reply.send(self.session.engine.read_byte(address));
            }
            SessionRequest::WriteMemory {
                address,
                value,
                reply,
            } => {
                debug!(address, value, "memory write");
                let _ = reply.send(self.session.engine.write_byte(address, value));
            }
        }
    }

    /// Checkpointing+Exit.
    async fn finish(self, cause: ExitCause) -> ExitCause {
        let Self {
            services,
            session,
            requests,
            rounds,
            ..
        } = self;
        let Session {
            handle,
            engine,
            key,
            checkpoint,
            open_ballot,
            ..
        } = session;
        let id = handle.id();

        // Pending requests get a closed reply channel
        drop(requests);

        // Lost the claim: a force stop landed after the round loop ended
        let cause = if cause == ExitCause::ForceStopped || !handle.claim_exit() {
            ExitCause::ForceStopped
        } else {
            cause
        };

        if cause == ExitCause::ForceStopped {
            drop(engine);
            retract_open_ballot(&*services, id, open_ballot).await;
            services.registry.unregister_exact(&handle);
            info!(rounds, cause = cause.name(), "session force stopped");
            return cause;
        }

        let saved = match services.store.save(&key, &checkpoint) {
            Ok(()) => true,
            Err(e) => {
                warn!(%key, error = %e, "exit checkpoint flush failed");
                false
            }
        };

        drop(engine);
        retract_open_ballot(&*services, id, open_ballot).await;

        services.registry.unregister_exact(&handle);
        services.notice(id, &cause.notice(saved)).await;
        services.announce_presence().await;

        info!(rounds, saved, cause = cause.name(), "session ended");
        cause
    }
}

/// Best-effort retract of the ballot a session left open.
async fn retract_open_ballot<Ctx, T>(
    services: &Services<Ctx, T>,
    id: SessionId,
    open_ballot: Option<BallotId>,
) where
    Ctx: SessionContext,
    T: BallotTransport,
{
    if let Some(ballot) = open_ballot {
        if let Err(e) = services.transport.retract_ballot(id, ballot).await {
            warn!(%ballot, error = %e, "failed to retract open ballot");
        }
    }
}
