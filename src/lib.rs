//! # Knockgate
//!
//! Authenticated UDP port-knocking core: a client sends one small
//! encrypted, signed datagram naming a user and an action; the daemon
//! validates it through a fixed admission pipeline and spawns the
//! configured action script. Datagrams that are not knock packets are
//! matched against configured "dead-drop" byte prefixes instead.
//!
//! ## Admission pipeline
//! ```text
//! UDP datagram
//!   └─ decrypt (RSA, secure servers only; fail-closed)
//!        └─ deserialize (fixed 245-byte layout)
//!             ├─ ok: user → signature → replay → action → dispatch
//!             └─ err: dead-drop prefix match → dispatch | log
//! ```
//!
//! ## Design
//! - **One-way protocol**: the daemon never answers; every failure is a
//!   silent drop, indistinguishable on the wire.
//! - **Sequential admission**: one datagram is processed to completion
//!   before the next is received.
//! - **Explicit wiring**: configuration, session, replay cache, and the
//!   action router are injected at construction; there are no globals.
//!
//! ## Example
//! ```no_run
//! use knockgate::config::KnockConfig;
//! use knockgate::protocol::ProcessRouter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> knockgate::error::Result<()> {
//!     let mut config = KnockConfig::from_file("/etc/knockgate/knockgate.toml")?;
//!     config.validate_strict()?;
//!     config.load_key_material()?;
//!
//!     knockgate::utils::logging::init(&config.logging)?;
//!     knockgate::transport::run(Arc::new(config), "edge", ProcessRouter).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::KnockConfig;
pub use core::packet::KnockPacket;
pub use crypto::KnockSession;
pub use error::{KnockError, Result};
pub use protocol::{ActionRouter, AdmissionPipeline, ProcessRouter, Verdict};
pub use utils::ReplayCache;
