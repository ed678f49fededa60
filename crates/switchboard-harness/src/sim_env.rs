//! Simulated environment on tokio's clock.
//!
//! Under a paused runtime the clock only moves when every task is idle, so
//! `sleep` resolves instantly in wall time while preserving ordering.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use switchboard_core::Environment;

/// Wall-clock start of every simulation (2023-11-14T22:13:20Z).
const EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Deterministic environment for harness tests.
#[derive(Clone)]
pub struct SimEnv {
    start: tokio::time::Instant,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment whose RNG is seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            start: tokio::time::Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn unix_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        EPOCH_MILLIS.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}
