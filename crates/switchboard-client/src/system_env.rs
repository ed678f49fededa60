//! Production [`Environment`]: wall clock, tokio timers, OS entropy.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use switchboard_core::Environment;

/// Production environment.
///
/// Randomness comes from `getrandom`, which seeds new mnemonics, so it must
/// be the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Never fails on supported platforms.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_is_recent() {
        // 2023-11-14
        assert!(SystemEnv::new().unix_millis() > 1_700_000_000_000);
    }

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_millis(20)).await;
        assert!(env.now() - start >= Duration::from_millis(20));
    }
}
