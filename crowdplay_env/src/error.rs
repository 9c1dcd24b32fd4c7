//! Error types for the Crowdplay adapter layer.

use thiserror::Error;

/// Errors raised by the emulator and transport adapters.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The emulator failed (bad ROM, corrupt state, address fault, ...)
    #[error("Engine error: {0}")]
    EngineError(String),

    /// The chat transport rejected or failed a request
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A ballot handle is no longer known to the transport
    #[error("Ballot not found: {0}")]
    BallotNotFound(String),

    /// Serialized engine state could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EnvError {
    /// Creates an engine error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::EngineError(msg.into())
    }

    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a ballot-not-found error.
    pub fn ballot_not_found(ballot: impl std::fmt::Display) -> Self {
        Self::BallotNotFound(ballot.to_string())
    }
}
