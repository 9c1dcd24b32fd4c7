//! Production implementation of SessionContext using Tokio.

use crate::SessionContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production context backed by the Tokio runtime and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Task names are carried by the caller's tracing span
        let _name = name;
        tokio::spawn(future);
    }
}
