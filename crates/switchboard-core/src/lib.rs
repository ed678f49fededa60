//! Switchboard core engine logic.
//!
//! Pure, I/O-free building blocks of the switchboard messaging engine:
//!
//! - [`bundle`]: the effect bundle every crypto-core call produces
//! - [`payload`]: parsers for the structured strings inside a bundle
//! - [`user_state`]: the opaque key/value store persisted for the owner
//! - [`liveness`]: payment hashes and tags awaiting confirmation
//! - [`settlement`]: bundles parked until their HTLC settles
//! - [`restore`]: the restore and incremental sync state machine
//!
//! ## Architecture
//!
//! ```text
//! switchboard-core   (this crate, no I/O)
//!   ├─ Environment      (time, randomness, sleeping)
//!   ├─ EffectBundle     (crypto-core output)
//!   ├─ LivenessTracker
//!   ├─ SettlementQueue
//!   └─ RestoreMachine   (action-based)
//!
//! switchboard-client  (session, dispatcher, transport adapters)
//! switchboard-harness (simulated environment and scripted collaborators)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bundle;
pub mod constants;
pub mod env;
pub mod error;
pub mod liveness;
pub mod payload;
pub mod restore;
pub mod settlement;
pub mod user_state;

pub use bundle::{EffectBundle, MessageType, Msg, NewInvite, Publish};
pub use env::{Environment, UniqueClock};
pub use error::ParseError;
pub use liveness::LivenessTracker;
pub use payload::{ContactInfo, MsgsCounts, Ping, SentStatus, SettledStatus, is_batch_topic};
pub use restore::{RestoreAction, RestoreMachine, RestoreProgress, RestoreState};
pub use settlement::{SettlementKey, SettlementQueue};
pub use user_state::UserState;
