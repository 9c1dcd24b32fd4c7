//! Full session lifecycles through the command facade on scripted adapters.

use crowdplay_core::{SessionStatus, DEFAULT_WARMUP_TICKS};
use crowdplay_env::{Action, AuthLevel, CallerId, SessionId};
use crowdplay_sim::{frame_tick, state_tick, SimConfig, SimWorld, STRANGER};

const STEPS: usize = 50_000;
const TETRIS_TICKS: u64 = 60;

fn world() -> SimWorld {
    SimWorld::new(SimConfig::default()).unwrap()
}

async fn start(world: &SimWorld, session: SessionId, env: &str) {
    let notice = world.command(session, &format!("!start {}", env)).await;
    assert_eq!(
        notice.as_deref(),
        Some(format!("> ✅ starting '{}'!", env.to_uppercase()).as_str())
    );
}

async fn shutdown(world: &SimWorld) {
    for session in world.active_sessions() {
        world.command(session, "!forcestop").await;
    }
    assert!(
        world
            .run_until(STEPS, |w| w.factory.live_engines() == 0)
            .await
    );
}

#[tokio::test]
async fn test_one_session_per_identity() {
    let world = world();
    let s = SessionId(1);

    start(&world, s, "tetris").await;
    let again = world.command(s, "!start pkm_red").await.unwrap();
    assert!(again.starts_with("> ⛔ game is already running"));
    assert_eq!(world.active_sessions(), vec![s]);
    assert_eq!(world.factory.live_engines(), 1);

    // A different channel is independent
    start(&world, SessionId(2), "tetris").await;
    assert_eq!(world.active_sessions(), vec![s, SessionId(2)]);
    assert_eq!(world.transport.presence(), vec![1, 2]);

    shutdown(&world).await;
}

#[tokio::test]
async fn test_default_environment() {
    let world = world();
    let s = SessionId(1);

    let notice = world.command(s, "!start").await.unwrap();
    assert_eq!(notice, "> ✅ starting 'PKM_RED'!");
    assert_eq!(
        world.services().registry.lookup(s).unwrap().environment(),
        "pkm_red"
    );

    shutdown(&world).await;
}

#[tokio::test]
async fn test_unauthorized_commands_are_silent() {
    let world = world();
    let s = SessionId(1);

    assert_eq!(world.facade.dispatch(STRANGER, s, "!start tetris").await, None);
    assert!(!world.is_active(s));
    assert!(world.transport.notices_for(s).is_empty());

    // Malformed input from a stranger is just as silent
    assert_eq!(world.facade.dispatch(STRANGER, s, "!read nope").await, None);

    // Exempt callers may command
    let helper = CallerId(77);
    world.transport.grant(helper, AuthLevel::Exempt);
    let notice = world.facade.dispatch(helper, s, "!start tetris").await;
    assert!(notice.unwrap().starts_with("> ✅"));

    shutdown(&world).await;
}

#[tokio::test]
async fn test_public_and_unknown_commands() {
    let world = world();
    let s = SessionId(1);

    let controls = world.facade.dispatch(STRANGER, s, "!controls").await.unwrap();
    for action in Action::MENU {
        assert!(controls.contains(action.glyph()));
    }

    assert_eq!(world.command(s, "!dance").await, None);
    assert_eq!(world.command(s, "hello !start").await, None);
}

#[tokio::test]
async fn test_unknown_environment() {
    let world = world();
    let notice = world.command(SessionId(1), "!start zelda").await.unwrap();
    assert_eq!(
        notice,
        "> ⛔ game 'zelda' not found! use 'list' to get a list of games."
    );

    let list = world.command(SessionId(1), "!list").await.unwrap();
    assert!(list.contains("pkm_red") && list.contains("harvest_moon"));
}

#[tokio::test]
async fn test_checkpoint_matches_every_completed_round() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    for _ in 0..3 {
        world.transport.vote(s, Action::Down, 2);
    }

    for round in 1..=4 {
        assert!(world.run_ballots(s, round, STEPS).await);

        let stored = world.checkpoint("tetris", s).and_then(|b| state_tick(&b));
        let ballots = world.transport.ballots_for(s);
        let preview = ballots.last().unwrap().artifact.preview().and_then(frame_tick);

        assert_eq!(stored, preview);
        assert_eq!(
            stored,
            Some(DEFAULT_WARMUP_TICKS as u64 + ballots.len() as u64 * TETRIS_TICKS)
        );
    }

    shutdown(&world).await;
}

#[tokio::test]
async fn test_resolved_ballots_are_retracted() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::A, 2);
    world.transport.vote(s, Action::B, 2);

    assert!(world.run_ballots(s, 3, STEPS).await);
    let ballots = world.transport.ballots_for(s);
    assert_eq!(world.transport.retracted(), vec![ballots[0].ballot, ballots[1].ballot]);
    assert_eq!(world.transport.open_ballots(), 1);

    shutdown(&world).await;
}

#[tokio::test]
async fn test_retract_failure_keeps_session_running() {
    let world = world();
    let s = SessionId(1);
    world.transport.fail_retracts(s);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::A, 2);
    world.transport.vote(s, Action::A, 2);

    assert!(world.run_ballots(s, 3, STEPS).await);
    assert_eq!(world.status(s), Some(SessionStatus::Running));

    shutdown(&world).await;
}

#[tokio::test]
async fn test_idle_expiry_after_threshold() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;

    assert!(world.run_to_exit(s, STEPS).await);
    assert_eq!(world.transport.polls(s), 720);
    assert_eq!(world.transport.ballot_count(s), 1);
    assert_eq!(
        world.checkpoint("tetris", s).and_then(|b| state_tick(&b)),
        Some(DEFAULT_WARMUP_TICKS as u64 + TETRIS_TICKS)
    );

    let notices = world.transport.notices_for(s);
    assert_eq!(
        notices.last().map(String::as_str),
        Some("> ⛔ game has been stopped due to inactivity. saved state!")
    );
    assert_eq!(world.factory.live_engines(), 0);
    assert_eq!(world.transport.open_ballots(), 0);
    assert_eq!(world.transport.presence().last(), Some(&0));
}

#[tokio::test]
async fn test_votes_reset_idle_counter() {
    let world = SimWorld::new(SimConfig::default().with_idle_expiry(Some(10))).unwrap();
    let s = SessionId(1);
    start(&world, s, "tetris").await;

    // Nine silent polls, a vote, nine more silent polls, a vote
    let silent = |n: usize| (0..n).map(|_| crowdplay_env::Tallies::new());
    world.transport.script(s, silent(9));
    world.transport.vote(s, Action::Up, 2);
    world.transport.script(s, silent(9));
    world.transport.vote(s, Action::Up, 2);

    assert!(world.run_ballots(s, 3, STEPS).await);
    assert!(world.is_active(s));

    // Then ten silent polls end it
    assert!(world.run_to_exit(s, STEPS).await);
    assert_eq!(world.transport.polls(s), 30);
}

#[tokio::test]
async fn test_exempt_session_never_expires() {
    let exempt = SessionId(9);
    let world = SimWorld::new(
        SimConfig::default()
            .with_idle_expiry(Some(5))
            .with_exempt(exempt),
    )
    .unwrap();
    start(&world, exempt, "tetris").await;
    start(&world, SessionId(10), "tetris").await;

    assert!(world.run_until(STEPS, |w| w.transport.polls(exempt) >= 50).await);
    assert!(world.is_active(exempt));
    assert!(!world.is_active(SessionId(10)));

    shutdown(&world).await;
}

#[tokio::test]
async fn test_stop_flushes_last_round_state() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::Start, 2);
    assert!(world.run_ballots(s, 2, STEPS).await);

    // Accepted silently; the exit notice is the only report
    assert_eq!(world.command(s, "!stop").await, None);
    assert_eq!(world.status(s), Some(SessionStatus::Stopping));
    assert_eq!(world.command(s, "!stop").await.unwrap(), "> ⛔ no game is running in this channel!");

    assert!(world.run_to_exit(s, STEPS).await);
    assert_eq!(world.transport.ballot_count(s), 2);
    assert_eq!(
        world.checkpoint("tetris", s).and_then(|b| state_tick(&b)),
        Some(DEFAULT_WARMUP_TICKS as u64 + 2 * TETRIS_TICKS)
    );
    let notices = world.transport.notices_for(s);
    assert_eq!(
        notices.last().map(String::as_str),
        Some("> ✅ thanks for playing! state was saved.")
    );
    assert_eq!(world.factory.live_engines(), 0);
}

#[tokio::test]
async fn test_crash_isolation_on_poll_failure() {
    let world = world();
    let victim = SessionId(1);
    let neighbour = SessionId(2);
    start(&world, victim, "tetris").await;
    start(&world, neighbour, "dr_mario").await;
    for _ in 0..3 {
        world.transport.vote(neighbour, Action::Select, 2);
    }

    world.transport.fail_polls(victim);
    assert!(world.run_to_exit(victim, STEPS).await);
    assert!(world.run_ballots(neighbour, 4, STEPS).await);

    let notices = world.transport.notices_for(victim);
    assert_eq!(
        notices.last().map(String::as_str),
        Some("> ⛔ game crashed! however state was saved, restore the save using load.")
    );
    assert_eq!(world.status(neighbour), Some(SessionStatus::Running));
    assert_eq!(world.factory.live_engines(), 1);

    // The crashed session's state is there to load
    assert!(world.command(victim, "!load tetris").await.unwrap().starts_with("> ✅"));

    shutdown(&world).await;
}

#[tokio::test]
async fn test_engine_fault_crashes_with_last_good_checkpoint() {
    let world = world();
    let s = SessionId(1);
    world.factory.fail_after("tetris", TETRIS_TICKS + 10);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::Right, 2);

    assert!(world.run_to_exit(s, STEPS).await);
    assert_eq!(
        world.checkpoint("tetris", s).and_then(|b| state_tick(&b)),
        Some(DEFAULT_WARMUP_TICKS as u64 + TETRIS_TICKS)
    );
    assert_eq!(world.factory.live_engines(), 0);
}

#[tokio::test]
async fn test_force_stop_is_immediate_and_skips_flush() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::A, 2);
    assert!(world.run_ballots(s, 2, STEPS).await);
    let before = world.checkpoint("tetris", s);

    let notice = world.command(s, "!forcestop").await.unwrap();
    assert_eq!(
        notice,
        "> ✅ force stopped successfully! progress since the last save is lost."
    );
    assert!(!world.is_active(s));
    let open = world.transport.ballots_for(s).last().map(|b| b.ballot);

    assert!(
        world
            .run_until(STEPS, |w| w.factory.live_engines() == 0 && w.transport.open_ballots() == 0)
            .await
    );
    assert_eq!(world.transport.open_ballots(), 0);
    assert!(open.is_some_and(|b| world.transport.retracted().contains(&b)));
    assert_eq!(world.checkpoint("tetris", s), before);
    assert_eq!(world.transport.notices_for(s).len(), 2);

    // Forcing a session that is not there
    assert_eq!(
        world.command(s, "!forcestop").await.unwrap(),
        "> ⛔ no game is running in this channel!"
    );
}

#[tokio::test]
async fn test_force_stopped_session_does_not_evict_successor() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    world.command(s, "!forcestop").await;

    // Restart before the old task has unwound
    start(&world, s, "pkm_red").await;
    assert!(world.run_until(STEPS, |w| w.factory.live_engines() == 1).await);
    assert!(world.is_active(s));
    assert_eq!(
        world.services().registry.lookup(s).unwrap().environment(),
        "pkm_red"
    );

    shutdown(&world).await;
}

#[tokio::test]
async fn test_force_stop_defers_to_a_session_already_exiting() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    assert!(world.run_ballots(s, 1, STEPS).await);

    // The controller has entered teardown and owns the exit notice
    let handle = world.services().registry.lookup(s).unwrap();
    assert!(handle.claim_exit());

    assert_eq!(
        world.command(s, "!forcestop").await.as_deref(),
        Some("> ⛔ no game is running in this channel!")
    );
    assert!(world.is_active(s));
    assert!(!world
        .transport
        .notices_for(s)
        .iter()
        .any(|n| n.contains("force stopped")));
}

#[tokio::test]
async fn test_exit_after_lost_claim_sends_no_notice() {
    let world = world();
    let s = SessionId(1);
    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::A, 2);
    assert!(world.run_ballots(s, 2, STEPS).await);
    let before = world.checkpoint("tetris", s);

    // A force stop claimed the exit just as the round loop ended
    let handle = world.services().registry.lookup(s).unwrap();
    assert!(handle.claim_exit());
    assert_eq!(world.command(s, "!stop").await, None);

    assert!(world.run_to_exit(s, STEPS).await);
    assert!(
        world
            .run_until(STEPS, |w| w.factory.live_engines() == 0 && w.transport.open_ballots() == 0)
            .await
    );
    assert_eq!(world.checkpoint("tetris", s), before);
    // Only the start notice; the claimant speaks for the exit
    assert_eq!(world.transport.notices_for(s).len(), 1);
}

#[tokio::test]
async fn test_save_and_load() {
    let world = world();
    let s = SessionId(1);

    assert_eq!(
        world.command(s, "!save").await.unwrap(),
        "> ⛔ no game is running in this channel!"
    );
    assert_eq!(
        world.command(s, "!load tetris").await.unwrap(),
        "> ⛔ no state was saved!"
    );

    start(&world, s, "tetris").await;
    world.transport.vote(s, Action::Up, 2);
    assert!(world.run_ballots(s, 2, STEPS).await);
    assert_eq!(world.command(s, "!save").await.unwrap(), "> ✅ saved state!");

    world.command(s, "!forcestop").await;
    assert!(world.run_until(STEPS, |w| w.factory.live_engines() == 0).await);
    let saved = world.checkpoint("tetris", s).and_then(|b| state_tick(&b)).unwrap();

    assert_eq!(
        world.command(s, "!load tetris").await.unwrap(),
        "> ✅ loaded 'TETRIS' from the last save!"
    );
    assert!(world.run_ballots(s, 3, STEPS).await);
    let resumed = world.transport.ballots_for(s)[2].artifact.frames[1].clone();
    assert_eq!(frame_tick(&resumed), Some(saved + 1));

    // Saves are per environment
    assert_eq!(
        world.command(SessionId(2), "!load pkm_red").await.unwrap(),
        "> ⛔ no state was saved!"
    );

    shutdown(&world).await;
}

#[tokio::test]
async fn test_memory_commands() {
    let world = world();
    let s = SessionId(1);

    assert_eq!(
        world.command(s, "!read d000").await.unwrap(),
        "> ⛔ no game is running in this channel!"
    );

    start(&world, s, "tetris").await;
    assert!(world.run_ballots(s, 1, STEPS).await);

    assert_eq!(
        world.command(s, "!write 0xD000 7f").await.unwrap(),
        "> ✅ wrote 0x7f to 0xd000"
    );
    assert_eq!(world.command(s, "!read d000").await.unwrap(), "> ✅ 0xd000 = 0x7f");

    assert_eq!(
        world.command(s, "!read xyz").await.unwrap(),
        "> ⛔ 'xyz' is not a valid address!"
    );
    assert_eq!(
        world.command(s, "!write d000 1ff").await.unwrap(),
        "> ⛔ '1ff' is not a valid byte!"
    );
    assert_eq!(
        world.command(s, "!write d000").await.unwrap(),
        "> ⛔ usage: write <address> <value>"
    );

    shutdown(&world).await;
}

#[tokio::test]
async fn test_sessions_listing() {
    let world = world();
    assert_eq!(
        world.command(SessionId(1), "!sessions").await.unwrap(),
        "> ✅ no games are running."
    );

    start(&world, SessionId(5), "tetris").await;
    start(&world, SessionId(3), "frogger").await;
    let listing = world.command(SessionId(1), "!sessions").await.unwrap();
    assert!(listing.starts_with("> ✅ 2 active:"));
    let lines: Vec<&str> = listing.lines().skip(1).collect();
    assert!(lines[0].starts_with("3 frogger running"));
    assert!(lines[1].starts_with("5 tetris running"));

    shutdown(&world).await;
}

#[tokio::test]
async fn test_launch_failure_leaves_no_session() {
    let world = world();
    let s = SessionId(1);
    world.factory.refuse_launch("tetris");

    let notice = world.command(s, "!start tetris").await.unwrap();
    assert!(notice.starts_with("> ⛔ failed to start game"));
    assert!(!world.is_active(s));
    assert_eq!(world.factory.live_engines(), 0);
    assert!(world.transport.presence().is_empty());
}

#[tokio::test]
async fn test_publish_retry_then_exhaustion() {
    let world = world();
    let s = SessionId(1);
    world.transport.fail_publishes(s, 4);
    start(&world, s, "tetris").await;
    assert!(world.run_ballots(s, 1, STEPS).await);
    assert!(world.is_active(s));

    world.transport.fail_publishes(s, 5);
    world.transport.vote(s, Action::Left, 2);
    assert!(world.run_to_exit(s, STEPS).await);
    assert_eq!(world.transport.failed_publishes(), 9);
    assert!(world
        .transport
        .notices_for(s)
        .iter()
        .any(|n| n.contains("crashed")));
}
