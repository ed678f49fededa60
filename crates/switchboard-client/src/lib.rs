//! Switchboard client
//!
//! The messaging engine: session lifecycle, effect dispatch and the broker
//! transport. Every crypto operation is delegated to a [`CryptoCore`]; every
//! persistent change is reported to registered [`Listener`]s.
//!
//! # Architecture
//!
//! ```text
//!   caller ──operation──> Session ──CoreCall──> CryptoCore
//!                            │                      │
//!                            │ <──── EffectBundle ──┘
//!                            v
//!                       dispatcher ──publish/subscribe──> Transport ──> broker
//!                            │                                 │
//!                            ├── EngineEvent ──> Listener      │
//!                            │                                 │
//!                            └ <──── inbound payloads ─────────┘
//! ```
//!
//! # Components
//!
//! - [`Session`]: account lifecycle and public operations
//! - [`DispatchContext`]: flags carried with a bundle through dispatch
//! - [`Transport`]: broker boundary; [`MqttTransport`] is the production one
//! - [`Listener`]: persistence and UI boundary
//! - [`SystemEnv`]: production [`Environment`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod batch;
mod config;
mod crypto;
mod dispatcher;
mod error;
mod listener;
#[cfg(feature = "mqtt")]
mod mqtt;
mod session;
mod system_env;
mod transport;

pub use config::{BrokerEndpoint, Network, SessionConfig};
pub use crypto::{CoreCall, CoreContext, CoreError, CryptoCore, Mnemonic, ParsedInvite};
pub use dispatcher::DispatchContext;
pub use error::{ClientError, ErrorClass};
pub use listener::{ConnectionStatus, EngineEvent, Listener};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
pub use session::{InviteRequest, OutgoingMessage, OwnerInfo, RestoreParams, Session, TribeJoin};
pub use switchboard_core::Environment;
pub use system_env::SystemEnv;
pub use transport::{ConnectOptions, Transport, TransportError, TransportEvent};
