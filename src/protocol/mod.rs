//! # Admission Protocol
//!
//! The per-datagram decision machinery: the admission pipeline, the
//! dead-drop matcher for unstructured payloads, and the action router
//! seam.
//!
//! ## Components
//! - **Admission**: decrypt → deserialize → authenticate → replay-check →
//!   dispatch state machine
//! - **Dead-drop**: prefix matching for payloads that are not knock packets
//! - **Router**: trait seam between admission decisions and process spawning

pub mod admission;
pub mod deaddrop;
pub mod router;

pub use admission::{AdmissionPipeline, DropReason, Verdict};
pub use router::{ActionRouter, ProcessRouter, RecordingRouter};
