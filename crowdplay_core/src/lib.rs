//! Crowdplay Core - Session orchestration for crowd-voted emulator play
//!
//! Runs many independent emulator sessions, each bound to one chat channel:
//!
//! ```text
//!   chat line ──► CommandFacade ──► SessionRegistry ◄── unregister on exit
//!                      │ spawn
//!                      ▼
//!               SessionController ──► simulate ─► capture ─► publish
//!                      ▲                                        │
//!                      └──────── apply ◄── vote (poll tallies) ◄┘
//!                                  │
//!                                  ▼
//!                           CheckpointStore
//! ```
//!
//! 1. **Registry**: at most one active session per identity
//! 2. **Controller**: one task per session, sole owner of its engine
//! 3. **Checkpoints**: the end state of every completed round is persisted
//!    before the crowd sees it

pub mod catalog;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod round;
pub mod services;
pub mod session;
pub mod vote;

// Re-export key types for convenience
pub use catalog::{Catalog, Environment, DEFAULT_WARMUP_TICKS};
pub use checkpoint::{
    CheckpointKey, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    SledCheckpointStore,
};
pub use commands::{Command, CommandFacade};
pub use config::{CrowdplayConfig, RoundConfig};
pub use controller::{ExitCause, SessionController};
pub use error::{CheckpointError, CommandError, ConfigError, RegistryError, RoundError};
pub use registry::SessionRegistry;
pub use round::{assemble_artifact, simulate_round, RoundCapture, RoundPlan};
pub use services::Services;
pub use session::{ActionPair, SessionHandle, SessionRequest, SessionStatus};
pub use vote::{tally_winner, BASELINE_TALLY};
