//! # Core Wire Components
//!
//! Low-level knock packet handling: binary codec and field digest.
//!
//! This module provides the foundation for the knock protocol - the fixed
//! wire layout and the deterministic digest used on both the sign and
//! verify paths.
//!
//! ## Components
//! - **Packet**: Fixed 245-byte knock packet with bounds-checked (de)serialization
//! - **Digest**: Ordered SHA-256 over the packet's logical fields
//!
//! ## Wire Format
//! ```text
//! [Version(1)] [Timestamp(4)] [UserId(2)] [ActionId(1)] [Challenge(4)]
//! [Hmac(32)] [PayloadLen(2)] [Payload(199)]
//! ```
//!
//! All multi-byte fields are network byte order. The payload buffer is
//! always transmitted at full capacity; only the first `payload_len` bytes
//! are meaningful.
//!
//! ## Security
//! - Fixed total size: a whole packet fits one RSA-2048 PKCS#1 v1.5 block
//! - Length validation before any field access
//! - The digest covers logical content only, never trailing padding

pub mod digest;
pub mod packet;
