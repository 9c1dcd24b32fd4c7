//! Error types for the session core.

use crowdplay_env::{EnvError, SessionId};
use thiserror::Error;

/// Checkpoint store failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint stored under '{0}'")]
    NotFound(String),

    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint storage error: {0}")]
    Storage(String),
}

/// Registry failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} is already active")]
    AlreadyActive(SessionId),

    #[error("session {0} is not active")]
    NotFound(SessionId),
}

/// Failures inside one round of a session. Every variant ends the session
/// as crashed.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("engine failed: {0}")]
    Engine(EnvError),

    #[error("transport failed: {0}")]
    Transport(EnvError),

    #[error("ballot publish failed after {attempts} attempts: {last}")]
    PublishExhausted { attempts: u32, last: EnvError },

    #[error("checkpoint save failed: {0}")]
    Persistence(#[from] CheckpointError),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Command failures. The `Display` text is the user-visible notice body.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("game '{0}' not found! use 'list' to get a list of games.")]
    UnknownEnvironment(String),

    #[error("game is already running in this channel! use 'stop' to stop the current game.")]
    AlreadyActive,

    #[error("no game is running in this channel!")]
    NotActive,

    #[error("cannot load state while game is running! use 'stop' first.")]
    LoadWhileActive,

    #[error("no state was saved!")]
    NoCheckpoint,

    #[error("'{0}' is not a valid address!")]
    MalformedAddress(String),

    #[error("'{0}' is not a valid byte!")]
    MalformedValue(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not authorized")]
    Unauthorized,

    #[error("failed to access memory: {0}")]
    Memory(EnvError),

    #[error("failed to start game: {0}")]
    Launch(EnvError),

    #[error("failed to save state: {0}")]
    Persistence(#[from] CheckpointError),

    #[error("transport failed: {0}")]
    Transport(EnvError),
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyActive(_) => CommandError::AlreadyActive,
            RegistryError::NotFound(_) => CommandError::NotActive,
        }
    }
}
