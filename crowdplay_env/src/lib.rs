//! Crowdplay Adapter Layer
//!
//! This crate defines the contracts between the session core and the
//! outside world, so the same controller code runs in **Production**
//! (tokio, a real emulator, a chat bot) and in **Simulation** (virtual
//! clock, scripted emulator, scripted voters).
//!
//! # The Three Seams
//!
//! - Time and tasks (`SessionContext`: `now()`, `sleep()`, `spawn()`)
//! - The emulator (`Emulator`, `EmulatorFactory`)
//! - The chat service (`BallotTransport`: ballots, tallies, notices)
//!
//! # Example
//!
//! ```ignore
//! use crowdplay_env::{SessionContext, BallotTransport};
//!
//! async fn wait_for_votes<Ctx: SessionContext, T: BallotTransport>(
//!     ctx: &Ctx,
//!     transport: &T,
//!     session: SessionId,
//!     ballot: BallotId,
//! ) -> Tallies {
//!     loop {
//!         ctx.sleep(Duration::from_secs(5)).await;
//!         let tallies = transport.poll_tallies(session, ballot).await?;
//!         if tallies.values().any(|&n| n > 1) {
//!             return tallies;
//!         }
//!     }
//! }
//! ```

mod context;
mod engine;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::SessionContext;
pub use engine::{Emulator, EmulatorFactory};
pub use transport::BallotTransport;
pub use types::{
    Action, Artifact, AuthLevel, BallotId, Button, CallerId, Frame, InputEvent, SessionId, Tallies,
};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
