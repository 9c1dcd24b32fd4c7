//! Simulation context implementing SessionContext for deterministic testing.

use async_trait::async_trait;
use crowdplay_env::SessionContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulation context backed by a virtual clock.
///
/// `sleep` never waits on the wall clock: it yields once to let other
/// session tasks run, then moves virtual time forward to the sleeper's
/// deadline. Sleepers that started together therefore share elapsed time
/// rather than adding it up. Run on a current-thread runtime for a fully
/// deterministic schedule.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, u64> {
        self.virtual_time_ns.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *self.clock() += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.clock()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derives an independent RNG stream from the master seed.
    pub fn rng(&self, stream: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
        }
    }
}

#[async_trait]
impl SessionContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.time_ns().saturating_add(duration.as_nanos() as u64);
        tokio::task::yield_now().await;

        let mut time = self.clock();
        if *time < deadline {
            *time = deadline;
        }
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, at_ns = self.time_ns(), "spawn");
        tokio::spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let ctx = SimContext::new(42);
        ctx.sleep(Duration::from_secs(5)).await;
        assert_eq!(ctx.now(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_concurrent_sleepers_share_elapsed_time() {
        let ctx = SimContext::shared(42);
        let a = ctx.sleep(Duration::from_secs(5));
        let b = ctx.sleep(Duration::from_secs(5));
        tokio::join!(a, b);
        assert_eq!(ctx.now(), Duration::from_secs(5));
    }

    #[test]
    fn test_rng_streams_are_deterministic() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: u64 = ctx1.rng(1).gen();
        let b: u64 = ctx2.rng(1).gen();
        let c: u64 = ctx1.rng(2).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));
        assert_eq!(ctx1.now(), ctx2.now());
    }
}
