//! Execution context trait for Crowdplay session controllers.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The interface between a session controller and the runtime it lives on.
///
/// This trait abstracts time and task spawning so that the same controller
/// code runs against the real clock in production and against a virtual
/// clock in the simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`
/// - **Simulation**: `SimContext` - virtual clock that advances on `sleep`
#[async_trait]
pub trait SessionContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for session uptime reporting. In simulation, this is the
    /// virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock and yields
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Every session controller runs in its own spawned task, so one
    /// session's slow poll never blocks another.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
