//! Deterministic field digest for knock packets.
//!
//! Produces the 32-byte SHA-256 digest that both the client signer and the
//! server verifier feed into HMAC. Both paths call this one function, so
//! the field order and byte encoding can never diverge between them.
//!
//! The digest covers, in order: version, timestamp, user_id, action_id,
//! challenge, payload_len, then exactly `payload[..payload_len]`. The
//! `hmac` field is skipped - it sits between `challenge` and `payload_len`
//! on the wire, but it carries the signature itself. Hashing only the
//! logical payload prefix keeps the digest independent of trailing
//! padding.

use sha2::{Digest, Sha256};

use crate::core::packet::KnockPacket;

/// Compute the SHA-256 digest over the packet's logical fields.
///
/// Multi-byte fields are hashed big-endian, matching the wire encoding.
pub fn generate(pkt: &KnockPacket) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update([pkt.version]);
    hasher.update(pkt.timestamp.to_be_bytes());
    hasher.update(pkt.user_id.to_be_bytes());
    hasher.update([pkt.action_id]);
    hasher.update(pkt.challenge.to_be_bytes());
    hasher.update(pkt.payload_len.to_be_bytes());
    hasher.update(pkt.payload_bytes());

    hasher.finalize().into()
}
