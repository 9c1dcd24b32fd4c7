//! The session model: status, the shared handle, and controller requests.
//!
//! A session is split in two:
//!
//! - [`SessionHandle`] is the small shared part the registry and command
//!   facade see (identity, environment, status, a request channel and a
//!   kill switch).
//! - Everything else (engine, checkpoint buffer, pending inputs, idle
//!   counter) lives in the controller task and is never shared.

use crate::error::CheckpointError;
use crowdplay_env::{Action, EnvError, InputEvent, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

/// Capacity of a session's request queue.
const REQUEST_QUEUE_DEPTH: usize = 16;

/// Lifecycle status of a session.
///
/// Transitions are monotone: only `Running -> Stopping` and
/// `Running -> Crashed` exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Normal round loop
    Running,
    /// Graceful stop requested; honoured at the next round boundary
    Stopping,
    /// Unexpected failure; the controller is exiting
    Crashed,
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The two inputs a round applies: a press at round start and a release at
/// the midpoint. Always present; the default is no input at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionPair {
    pub pre: Option<InputEvent>,
    pub post: Option<InputEvent>,
}

impl From<Action> for ActionPair {
    fn from(action: Action) -> Self {
        let (pre, post) = action.pulse();
        Self { pre, post }
    }
}

/// Work the command facade hands to a running controller.
///
/// The controller is the only owner of the engine and the checkpoint
/// buffer, so anything touching them goes through this queue.
#[derive(Debug)]
pub enum SessionRequest {
    /// Flush the current checkpoint buffer to the store
    Save {
        reply: oneshot::Sender<Result<(), CheckpointError>>,
    },

    /// Read one byte of engine memory
    ReadMemory {
        address: u16,
        reply: oneshot::Sender<Result<u8, EnvError>>,
    },

    /// Write one byte of engine memory
    WriteMemory {
        address: u16,
        value: u8,
        reply: oneshot::Sender<Result<(), EnvError>>,
    },
}

/// The shared face of a session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    environment: String,
    started_at: Duration,
    status: Mutex<SessionStatus>,
    requests: mpsc::Sender<SessionRequest>,
    kill: Notify,
    exit_claimed: AtomicBool,
}

impl SessionHandle {
    /// Creates a running session handle and the request receiver its
    /// controller will own.
    pub fn new(
        id: SessionId,
        environment: &str,
        started_at: Duration,
    ) -> (Self, mpsc::Receiver<SessionRequest>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let handle = Self {
            id,
            environment: environment.to_lowercase(),
            started_at,
            status: Mutex::new(SessionStatus::Running),
            requests: tx,
            kill: Notify::new(),
            exit_claimed: AtomicBool::new(false),
        };
        (handle, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Context time at which the session started.
    pub fn started_at(&self) -> Duration {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    /// Requests a graceful stop. Returns false if the session had already
    /// left `Running`.
    pub fn request_stop(&self) -> bool {
        self.transition(SessionStatus::Stopping)
    }

    /// Records a crash. Returns false if the session had already left
    /// `Running`.
    pub fn mark_crashed(&self) -> bool {
        self.transition(SessionStatus::Crashed)
    }

    fn transition(&self, to: SessionStatus) -> bool {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        if *status == SessionStatus::Running {
            *status = to;
            true
        } else {
            false
        }
    }

    /// Queues a request for the controller.
    ///
    /// Fails if the controller has already exited.
    pub async fn send(&self, request: SessionRequest) -> Result<(), SessionRequest> {
        self.requests.send(request).await.map_err(|e| e.0)
    }

    /// Claims the session's exit. Exactly one caller wins: either the
    /// controller entering teardown or a force stop. The winner sends the
    /// terminal notice.
    pub fn claim_exit(&self) -> bool {
        !self.exit_claimed.swap(true, Ordering::AcqRel)
    }

    /// Fires the kill switch. The controller drops its round mid-flight,
    /// releases the engine and skips the checkpoint flush.
    pub fn kill(&self) {
        self.kill.notify_one();
    }

    /// Resolves once [`kill`](Self::kill) has been called.
    pub async fn killed(&self) {
        self.kill.notified().await;
    }
}
