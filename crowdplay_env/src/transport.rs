//! Ballot transport abstraction for Crowdplay sessions.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Action, Artifact, AuthLevel, BallotId, CallerId, SessionId, Tallies};

/// Abstraction over the chat service that carries ballots and notices.
///
/// # Implementations
///
/// - **Production**: a chat bot client (messages + reactions)
/// - **Simulation**: `ScriptedTransport` with scripted tallies and faults
///
/// # Ballot Flow
///
/// ```text
/// Controller                 Transport                   Voters
///   |                           |                          |
///   |-- publish_ballot -------->|-- artifact + menu ------>|
///   |                           |<------- reactions -------|
///   |-- poll_tallies (5s) ----->|                          |
///   |<-------- tallies ---------|                          |
///   |-- retract_ballot -------->|                          |
/// ```
#[async_trait]
pub trait BallotTransport: Send + Sync + 'static {
    /// Publishes an artifact with a selectable action menu.
    ///
    /// # Returns
    /// * `Ok(BallotId)` - Ballot is live and collecting votes
    /// * `Err(EnvError::TransportError)` - Publishing failed; nothing is left
    ///   behind on the transport side
    async fn publish_ballot(
        &self,
        session: SessionId,
        artifact: &Artifact,
        menu: &[Action],
    ) -> Result<BallotId, EnvError>;

    /// Returns the current tallies of a ballot.
    ///
    /// Every menu entry carries the ballot's own default marker, so an
    /// action with no votes reports a count of 1.
    async fn poll_tallies(&self, session: SessionId, ballot: BallotId) -> Result<Tallies, EnvError>;

    /// Removes a resolved or abandoned ballot.
    async fn retract_ballot(&self, session: SessionId, ballot: BallotId) -> Result<(), EnvError>;

    /// Sends a plain-text status notice to a session's channel.
    async fn notify(&self, session: SessionId, text: &str) -> Result<(), EnvError>;

    /// Returns the caller's authorization level within a session's channel.
    async fn authorization_level(
        &self,
        session: SessionId,
        caller: CallerId,
    ) -> Result<AuthLevel, EnvError>;

    /// Updates the process-wide presence line with the active session count.
    async fn update_presence(&self, active_sessions: usize) -> Result<(), EnvError>;
}
