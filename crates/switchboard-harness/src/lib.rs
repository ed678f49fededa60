//! Deterministic harness for switchboard engine testing.
//!
//! In-memory implementations of the engine's boundaries:
//!
//! - [`SimEnv`]: tokio virtual clock plus a seeded RNG
//! - [`MockTransport`]: records publishes and subscriptions, injects events
//! - [`ScriptedCore`]: answers core calls with pre-scripted bundles
//! - [`RecordingListener`]: records every event and persistence hook
//!
//! Tests run under `#[tokio::test(start_paused = true)]`, so the register
//! delay elapses instantly and publish timestamps are exact.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mock_transport;
pub mod recording_listener;
pub mod scripted_core;
pub mod sim_env;

use std::sync::Arc;

pub use mock_transport::{MockTransport, Published};
pub use recording_listener::{Record, RecordingListener};
pub use scripted_core::ScriptedCore;
pub use sim_env::SimEnv;
use switchboard_client::{Session, SessionConfig};

/// A session wired to in-memory collaborators.
pub struct Harness {
    /// Engine under test.
    pub session: Session<SimEnv>,
    /// Scripted crypto core.
    pub core: Arc<ScriptedCore>,
    /// Recording transport.
    pub transport: Arc<MockTransport>,
    /// Recording listener.
    pub listener: Arc<RecordingListener>,
}

impl Harness {
    /// Test-mode session seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, SessionConfig::test())
    }

    /// Session with an explicit configuration.
    pub fn with_config(seed: u64, config: SessionConfig) -> Self {
        let core = Arc::new(ScriptedCore::new());
        let transport = Arc::new(MockTransport::new());
        let listener = Arc::new(RecordingListener::new());
        let session = Session::new(SimEnv::new(seed), config, core.clone(), transport.clone());
        session.add_listener(listener.clone());
        Self { session, core, transport, listener }
    }

    /// Let spawned tasks (event pump, register continuations) run.
    pub async fn settle(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
}

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
