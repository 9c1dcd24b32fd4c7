//! Scenario runner - executes session lifecycle scenarios.

use crate::engine::{frame_tick, state_tick, LAST_PRESS_ADDR};
use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use crowdplay_core::{CheckpointStore, RoundPlan, SessionStatus, DEFAULT_WARMUP_TICKS};
use crowdplay_env::{Action, SessionContext, SessionId, Tallies};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Scheduler turns a scenario may take before it is declared stuck.
const DEFAULT_MAX_STEPS: usize = 200_000;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Sessions started during the run
    pub sessions: usize,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Ballots that reached the transport
    pub ballots_published: u64,

    /// Publish attempts rejected by fault injection
    pub failed_publishes: u64,

    /// Tally polls across all sessions
    pub polls: u64,

    /// Notices delivered
    pub notices: u64,

    /// Engines launched (priming included)
    pub engines_launched: u64,

    /// Engines still alive when the scenario ended
    pub live_engines: u64,

    /// Checkpoints held by the store
    pub checkpoints: u64,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld) -> Self {
        Self {
            ballots_published: world.transport.published().len() as u64,
            failed_publishes: world.transport.failed_publishes(),
            polls: world.transport.total_polls(),
            notices: world.transport.notice_count() as u64,
            engines_launched: world.factory.launched() as u64,
            live_engines: world.factory.live_engines() as u64,
            checkpoints: world.checkpoint_count() as u64,
        }
    }
}

type Check = Result<(), String>;

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

/// Notices that end a session (one per session lifetime).
fn terminal_notices(world: &SimWorld, session: SessionId) -> usize {
    world
        .transport
        .notices_for(session)
        .iter()
        .filter(|n| {
            n.contains("thanks for playing") || n.contains("crashed") || n.contains("inactivity")
        })
        .count()
}

fn tallies(entries: &[(Action, u32)]) -> Tallies {
    entries.iter().copied().collect()
}

/// Runs session scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Sessions for multi-session scenarios
    num_sessions: usize,

    /// Scheduler turn budget
    max_steps: usize,

    /// Store session checkpoints as files
    file_checkpoints: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_sessions: usize) -> Self {
        Self {
            seed,
            num_sessions: num_sessions.max(2),
            max_steps: DEFAULT_MAX_STEPS,
            file_checkpoints: false,
        }
    }

    /// Sets the scheduler turn budget.
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    /// Runs scenarios against the file checkpoint store.
    pub fn with_file_checkpoints(mut self, enabled: bool) -> Self {
        self.file_checkpoints = enabled;
        self
    }

    fn world_config(&self, scenario: ScenarioId) -> SimConfig {
        let config = SimConfig::default()
            .with_seed(self.seed)
            .with_file_checkpoints(self.file_checkpoints);
        match scenario {
            ScenarioId::VoteStorm => config.with_voter(0.3),
            _ => config,
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and captures everything the transport saw.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let mut export = SimExport::new(scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let result = self.failed(scenario, format!("runtime: {}", e));
                return (result, export);
            }
        };

        let result = runtime.block_on(async {
            let world = match SimWorld::new(self.world_config(scenario)) {
                Ok(world) => world,
                Err(e) => return self.failed(scenario, format!("world setup: {}", e)),
            };

            let outcome = self.play(scenario, &world).await;
            self.teardown(&world).await;
            export.capture(&world);

            let sessions = world
                .transport
                .published()
                .iter()
                .map(|b| b.session)
                .collect::<std::collections::BTreeSet<_>>()
                .len();

            ScenarioResult {
                scenario,
                seed: self.seed,
                passed: outcome.is_ok(),
                sessions,
                final_time_secs: world.context.now().as_secs_f64(),
                failure_reason: outcome.err(),
                metrics: ScenarioMetrics::collect(&world),
            }
        });

        export.finalize(&result);
        (result, export)
    }

    fn failed(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            sessions: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }

    async fn play(&self, scenario: ScenarioId, world: &SimWorld) -> Check {
        match scenario {
            ScenarioId::VoteCycle => self.run_vote_cycle(world).await,
            ScenarioId::TieBreak => self.run_tie_break(world).await,
            ScenarioId::IdleExpiry => self.run_idle_expiry(world).await,
            ScenarioId::CrashIsolation => self.run_crash_isolation(world).await,
            ScenarioId::StopResume => self.run_stop_resume(world).await,
            ScenarioId::ForceStop => self.run_force_stop(world).await,
            ScenarioId::PublishRetry => self.run_publish_retry(world).await,
            ScenarioId::VoteStorm => self.run_vote_storm(world).await,
        }
    }

    /// Force-stops whatever is still running so no task outlives the world.
    async fn teardown(&self, world: &SimWorld) {
        for session in world.active_sessions() {
            warn!(%session, "session still active at teardown");
            world.command(session, "!forcestop").await;
        }
        world
            .run_until(self.max_steps, |w| w.factory.live_engines() == 0)
            .await;
    }

    fn ticks_of(world: &SimWorld, environment: &str) -> Result<u64, String> {
        world
            .services()
            .catalog
            .get(environment)
            .map(|e| e.ticks_per_round as u64)
            .ok_or_else(|| format!("{} missing from catalog", environment))
    }

    async fn start(&self, world: &SimWorld, session: SessionId, environment: &str) -> Check {
        let notice = world
            .command(session, &format!("!start {}", environment))
            .await
            .unwrap_or_default();
        ensure(notice.starts_with("> ✅"), || {
            format!("start {} on {} failed: {:?}", environment, session, notice)
        })
    }

    async fn stop_all(&self, world: &SimWorld, sessions: &[SessionId]) -> Check {
        for session in sessions {
            // Accepted stops are silent; the exit notice follows
            let notice = world.command(*session, "!stop").await;
            ensure(notice.is_none(), || {
                format!("stop on {} failed: {:?}", session, notice)
            })?;
        }
        let drained = world
            .run_until(self.max_steps, |w| {
                sessions.iter().all(|s| !w.is_active(*s)) && w.factory.live_engines() == 0
            })
            .await;
        ensure(drained, || "sessions did not exit after stop".to_string())
    }

    /// CP-001: voted rounds on several sessions, checkpoint after every
    /// round, clean stop.
    async fn run_vote_cycle(&self, world: &SimWorld) -> Check {
        info!("CP-001: VoteCycle");
        const ENVIRONMENTS: [&str; 3] = ["tetris", "pkm_red", "dr_mario"];
        const VOTED_ROUNDS: usize = 3;

        let sessions: Vec<SessionId> = (0..self.num_sessions)
            .map(|i| SessionId(100 + i as u64))
            .collect();

        for (i, session) in sessions.iter().enumerate() {
            self.start(world, *session, ENVIRONMENTS[i % ENVIRONMENTS.len()])
                .await?;
            for _ in 0..VOTED_ROUNDS {
                world.transport.vote(*session, Action::A, 3);
            }
        }

        let published = world
            .run_until(self.max_steps, |w| {
                sessions
                    .iter()
                    .all(|s| w.transport.ballot_count(*s) > VOTED_ROUNDS)
            })
            .await;
        ensure(published, || "sessions stalled before the last ballot".to_string())?;

        let round = world.services().config.round.clone();
        for (i, session) in sessions.iter().enumerate() {
            let env = ENVIRONMENTS[i % ENVIRONMENTS.len()];
            let ticks = Self::ticks_of(world, env)?;
            let plan = RoundPlan::new(ticks as u32, &round);
            let expected = DEFAULT_WARMUP_TICKS as u64 + ticks * (VOTED_ROUNDS as u64 + 1);

            let stored = world.checkpoint(env, *session).and_then(|b| state_tick(&b));
            ensure(stored == Some(expected), || {
                format!("{}: stored tick {:?}, expected {}", session, stored, expected)
            })?;

            for ballot in world.transport.ballots_for(*session) {
                ensure(ballot.menu == Action::MENU.to_vec(), || "menu changed".to_string())?;
                ensure(ballot.artifact.len() == plan.frame_count() + 1, || {
                    format!("artifact has {} frames", ballot.artifact.len())
                })?;
                ensure(ballot.artifact.preview() == ballot.artifact.frames.last(), || {
                    "preview is not the newest frame".to_string()
                })?;
            }
            debug!(%session, env, ballots = world.transport.ballot_count(*session), "verified");
        }

        self.stop_all(world, &sessions).await?;

        for (i, session) in sessions.iter().enumerate() {
            let env = ENVIRONMENTS[i % ENVIRONMENTS.len()];
            let ticks = Self::ticks_of(world, env)?;
            let expected = DEFAULT_WARMUP_TICKS as u64 + ticks * (VOTED_ROUNDS as u64 + 1);
            let stored = world.checkpoint(env, *session).and_then(|b| state_tick(&b));
            ensure(stored == Some(expected), || {
                format!("{}: exit flush wrote tick {:?}", session, stored)
            })?;
            ensure(terminal_notices(world, *session) == 1, || {
                format!("{}: expected one terminal notice", session)
            })?;
        }
        ensure(world.transport.open_ballots() == 0, || "ballots left open".to_string())
    }

    /// CP-002: `{no-op:1, up:3, down:3}` applies `up`.
    async fn run_tie_break(&self, world: &SimWorld) -> Check {
        info!("CP-002: TieBreak");
        let session = SessionId(200);

        self.start(world, session, "tetris").await?;
        world.transport.script(
            session,
            [tallies(&[(Action::NoInput, 1), (Action::Up, 3), (Action::Down, 3)])],
        );

        let advanced = world.run_ballots(session, 2, self.max_steps).await;
        ensure(advanced, || "tie was never resolved".to_string())?;

        let notice = world
            .command(session, &format!("!read {:x}", LAST_PRESS_ADDR))
            .await
            .unwrap_or_default();
        ensure(notice == "> ✅ 0xff01 = 0x04", || {
            format!("expected up to be pressed, got {:?}", notice)
        })?;

        self.stop_all(world, &[session]).await
    }

    /// CP-003: a silent crowd ends the session after the idle threshold.
    async fn run_idle_expiry(&self, world: &SimWorld) -> Check {
        info!("CP-003: IdleExpiry");
        let session = SessionId(300);
        let limit = world
            .services()
            .config
            .round
            .idle_expiry_polls
            .ok_or_else(|| "idle expiry disabled".to_string())?;

        self.start(world, session, "tetris").await?;
        let exited = world.run_to_exit(session, self.max_steps).await;
        ensure(exited, || "session never expired".to_string())?;

        let polls = world.transport.polls(session);
        ensure(polls == limit as u64, || format!("expired after {} polls", polls))?;
        ensure(world.transport.ballot_count(session) == 1, || {
            "rounds advanced without votes".to_string()
        })?;

        let expected = DEFAULT_WARMUP_TICKS as u64 + Self::ticks_of(world, "tetris")?;
        let stored = world.checkpoint("tetris", session).and_then(|b| state_tick(&b));
        ensure(stored == Some(expected), || format!("stored tick {:?}", stored))?;

        let notices = world.transport.notices_for(session);
        ensure(
            notices.last().map_or(false, |n| n.contains("inactivity")),
            || format!("unexpected notices {:?}", notices),
        )?;
        ensure(world.factory.live_engines() == 0, || "engine leaked".to_string())
    }

    /// CP-004: one engine faults, the others keep playing.
    async fn run_crash_isolation(&self, world: &SimWorld) -> Check {
        info!("CP-004: CrashIsolation");
        let victim = SessionId(400);
        let bystanders: Vec<SessionId> = (1..self.num_sessions)
            .map(|i| SessionId(400 + i as u64))
            .collect();
        let frogger = Self::ticks_of(world, "frogger")?;

        // Fails during the third round
        world.factory.fail_after("frogger", frogger * 2 + frogger / 2);

        self.start(world, victim, "frogger").await?;
        for session in &bystanders {
            self.start(world, *session, "tetris").await?;
        }
        for session in std::iter::once(&victim).chain(bystanders.iter()) {
            for _ in 0..4 {
                world.transport.vote(*session, Action::Right, 2);
            }
        }

        let settled = world
            .run_until(self.max_steps, |w| {
                !w.is_active(victim)
                    && bystanders.iter().all(|s| w.transport.ballot_count(*s) >= 5)
            })
            .await;
        ensure(settled, || "crash did not settle".to_string())?;

        let notices = world.transport.notices_for(victim);
        ensure(
            notices.iter().any(|n| n.contains("crashed") && n.contains("saved")),
            || format!("victim notices {:?}", notices),
        )?;
        let expected = DEFAULT_WARMUP_TICKS as u64 + frogger * 2;
        let stored = world.checkpoint("frogger", victim).and_then(|b| state_tick(&b));
        ensure(stored == Some(expected), || format!("victim stored tick {:?}", stored))?;

        for session in &bystanders {
            ensure(world.status(*session) == Some(SessionStatus::Running), || {
                format!("{} disturbed by the crash", session)
            })?;
        }
        ensure(world.factory.live_engines() == bystanders.len(), || {
            "victim engine leaked".to_string()
        })?;

        self.stop_all(world, &bystanders).await
    }

    /// CP-005: stop flushes, load continues from the same state.
    async fn run_stop_resume(&self, world: &SimWorld) -> Check {
        info!("CP-005: StopResume");
        let session = SessionId(500);

        self.start(world, session, "pkm_red").await?;
        world.transport.vote(session, Action::Start, 2);
        world.transport.vote(session, Action::A, 2);
        let advanced = world.run_ballots(session, 3, self.max_steps).await;
        ensure(advanced, || "rounds did not advance".to_string())?;

        let saved = world.command(session, "!save").await.unwrap_or_default();
        ensure(saved == "> ✅ saved state!", || format!("save: {:?}", saved))?;

        let refused = world.command(session, "!load pkm_red").await.unwrap_or_default();
        ensure(refused.starts_with("> ⛔"), || "load accepted while running".to_string())?;
        let duplicate = world.command(session, "!start").await.unwrap_or_default();
        ensure(duplicate.starts_with("> ⛔"), || "second start accepted".to_string())?;

        self.stop_all(world, &[session]).await?;
        let stored = world
            .checkpoint("pkm_red", session)
            .and_then(|b| state_tick(&b))
            .ok_or_else(|| "nothing stored".to_string())?;

        let loaded = world.command(session, "!load pkm_red").await.unwrap_or_default();
        ensure(loaded.starts_with("> ✅"), || format!("load: {:?}", loaded))?;
        let resumed = world.run_ballots(session, 4, self.max_steps).await;
        ensure(resumed, || "loaded session never published".to_string())?;

        let ballots = world.transport.ballots_for(session);
        let first = ballots
            .last()
            .and_then(|b| b.artifact.frames.get(1))
            .and_then(frame_tick);
        ensure(first == Some(stored + 1), || {
            format!("resumed at {:?}, saved at {}", first, stored)
        })?;

        self.stop_all(world, &[session]).await
    }

    /// CP-006: force-stop is immediate and skips the flush.
    async fn run_force_stop(&self, world: &SimWorld) -> Check {
        info!("CP-006: ForceStop");
        let session = SessionId(600);

        self.start(world, session, "tetris").await?;
        world.transport.vote(session, Action::B, 2);
        world.transport.vote(session, Action::B, 2);
        let advanced = world.run_ballots(session, 3, self.max_steps).await;
        ensure(advanced, || "rounds did not advance".to_string())?;
        let before = world.checkpoint("tetris", session);

        let notice = world.command(session, "!forcestop").await.unwrap_or_default();
        ensure(notice.starts_with("> ✅ force stopped"), || format!("forcestop: {:?}", notice))?;
        ensure(!world.is_active(session), || "still registered".to_string())?;

        let released = world
            .run_until(self.max_steps, |w| {
                w.factory.live_engines() == 0 && w.transport.open_ballots() == 0
            })
            .await;
        ensure(released, || "engine or ballot not released".to_string())?;
        ensure(terminal_notices(world, session) == 0, || {
            "force-stopped session sent a terminal notice".to_string()
        })?;
        ensure(world.checkpoint("tetris", session) == before, || {
            "checkpoint changed after force-stop".to_string()
        })?;

        // Identity is free again straight away
        self.start(world, session, "tetris").await?;
        ensure(world.is_active(session), || "restart not registered".to_string())?;
        self.stop_all(world, &[session]).await
    }

    /// CP-007: transient publish failures are retried, exhaustion crashes.
    async fn run_publish_retry(&self, world: &SimWorld) -> Check {
        info!("CP-007: PublishRetry");
        let session = SessionId(700);
        let attempts = world.services().config.round.publish_attempts;

        world.transport.fail_publishes(session, attempts - 1);
        self.start(world, session, "tetris").await?;
        let published = world.run_ballots(session, 1, self.max_steps).await;
        ensure(published, || "never published".to_string())?;
        ensure(world.is_active(session), || "transient failures crashed the session".to_string())?;

        world.transport.fail_publishes(session, attempts);
        world.transport.vote(session, Action::Left, 2);
        let exited = world.run_to_exit(session, self.max_steps).await;
        ensure(exited, || "exhausted publish did not crash".to_string())?;

        let failed = world.transport.failed_publishes();
        ensure(failed == (2 * attempts - 1) as u64, || format!("{} failed publishes", failed))?;
        let notices = world.transport.notices_for(session);
        ensure(notices.iter().any(|n| n.contains("crashed")), || {
            format!("notices {:?}", notices)
        })?;

        let expected = DEFAULT_WARMUP_TICKS as u64 + 2 * Self::ticks_of(world, "tetris")?;
        let stored = world.checkpoint("tetris", session).and_then(|b| state_tick(&b));
        ensure(stored == Some(expected), || format!("stored tick {:?}", stored))
    }

    /// CP-008: many sessions under a seeded random crowd.
    async fn run_vote_storm(&self, world: &SimWorld) -> Check {
        info!("CP-008: VoteStorm ({} sessions)", self.num_sessions);
        const ROUNDS: usize = 5;

        let names: Vec<String> = world.services().catalog.iter().map(|e| e.name.clone()).collect();
        let sessions: Vec<SessionId> = (0..self.num_sessions)
            .map(|i| SessionId(800 + i as u64))
            .collect();
        for (i, session) in sessions.iter().enumerate() {
            self.start(world, *session, &names[i % names.len()]).await?;
        }
        ensure(world.active_sessions() == sessions, || "registry out of sync".to_string())?;

        let played = world
            .run_until(self.max_steps, |w| {
                sessions.iter().all(|s| w.transport.ballot_count(*s) >= ROUNDS)
            })
            .await;
        ensure(played, || "crowd stalled".to_string())?;

        for ballot in world.transport.published() {
            ensure(ballot.artifact.preview() == ballot.artifact.frames.last(), || {
                format!("bad preview on {}", ballot.ballot)
            })?;
        }

        self.stop_all(world, &sessions).await?;
        for session in &sessions {
            ensure(terminal_notices(world, *session) == 1, || {
                format!("{}: expected one terminal notice", session)
            })?;
        }
        ensure(world.checkpoint_count() >= sessions.len(), || "missing checkpoints".to_string())?;
        ensure(
            world.store.exists(&crowdplay_core::CheckpointKey::new(&names[0], sessions[0])),
            || "first session checkpoint missing".to_string(),
        )
    }
}
