//! # Transport
//!
//! UDP socket setup and the daemon receive loop.
//!
//! The protocol is strictly one-way: the daemon receives and never sends,
//! so from the network's perspective every failure mode is a silent drop.

pub mod udp;

pub use udp::{run, run_with_shutdown};
