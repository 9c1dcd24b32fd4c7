//! Crowdplay Deterministic Simulation Harness
//!
//! Runs real session controllers and the real command facade against
//! scripted adapters, so whole session lifecycles can be replayed from a
//! single seed.
//!
//! # Core Principle: Nothing Real Underneath
//!
//! - **Time**: `SimContext` keeps a virtual clock; sleeping yields to the
//!   other sessions and jumps the clock forward
//! - **Engine**: `ScriptedEmulator` is a deterministic fake with fault
//!   injection and a live-engine counter
//! - **Crowd**: `ScriptedTransport` replays scripted tallies or a seeded
//!   Poisson crowd
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │                                                          │
//! │   chat line ──► CommandFacade ──► SessionRegistry        │
//! │                      │                                   │
//! │         ┌────────────┼────────────┐                      │
//! │    ┌────▼─────┐ ┌────▼─────┐ ┌────▼─────┐                │
//! │    │Controller│ │Controller│ │Controller│   ...          │
//! │    └────┬─────┘ └────┬─────┘ └────┬─────┘                │
//! │         │            │            │                      │
//! │  ┌──────▼────────────▼────────────▼──────┐               │
//! │  │ ScriptedEmulator · ScriptedTransport  │               │
//! │  │ MemoryCheckpointStore · SimContext    │               │
//! │  └───────────────────────────────────────┘               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use crowdplay_sim::{SimWorld, SimConfig};
//!
//! let world = SimWorld::new(SimConfig::default())?;
//! world.command(SessionId(1), "!start tetris").await;
//! world.run_ballots(SessionId(1), 3, 10_000).await;
//! ```

mod context;
mod engine;
mod exporter;
mod runner;
mod transport;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use engine::{
    button_bit, frame_tick, state_tick, ScriptedEmulator, ScriptedEmulatorFactory, JOYPAD_ADDR,
    LAST_PRESS_ADDR, MEMORY_SIZE,
};
pub use exporter::{BallotRecord, SessionRecord, SimExport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use transport::{PublishedBallot, ScriptedTransport};
pub use world::{SimConfig, SimError, SimWorld, ADMIN, STRANGER};
