//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples engine logic from system resources
//! (time, randomness, sleeping). This enables:
//!
//! - Deterministic tests: the harness drives a virtual clock and a seeded RNG,
//!   so register delays and timestamps are reproducible.
//!
//! - Production runtime: the client's `SystemEnv` uses the wall clock, tokio
//!   timers and OS entropy without any change to the engine.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production (it seeds new mnemonics)
/// 3. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch.
    ///
    /// The crypto core signs and orders every call with a wall-clock
    /// timestamp, so this is separate from the monotonic `now()`.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only used to sequence the register-then-publish continuation; engine
    /// logic never sleeps otherwise.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Issues strictly increasing millisecond timestamps.
///
/// The crypto core rejects two calls carrying the same timestamp, so every
/// call gets `max(wall_clock, last + 1)`.
#[derive(Debug, Default)]
pub struct UniqueClock {
    last: u64,
}

impl UniqueClock {
    /// Create a clock that has not issued any timestamp yet.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Next timestamp given the current wall clock reading.
    pub fn next(&mut self, wall_millis: u64) -> u64 {
        let next = wall_millis.max(self.last.saturating_add(1));
        self.last = next;
        next
    }

    /// The last timestamp issued, or 0.
    pub fn last(&self) -> u64 {
        self.last
    }
}
