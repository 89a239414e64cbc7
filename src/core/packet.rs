//! Knock packet wire codec.
//!
//! The packet layout is fixed and identical on the client and server. Field
//! order is load-bearing: it is also the digest input order (see
//! [`crate::core::digest`]). All multi-byte fields are encoded big-endian,
//! so client and server builds never have to share endianness.

use bytes::{Buf, BufMut};

use crate::error::DeserializeError;

/// Single supported protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed capacity of the payload buffer.
pub const PAYLOAD_CAPACITY: usize = 199;

/// Total wire size of a knock packet:
/// 1 (version) + 4 (timestamp) + 2 (user_id) + 1 (action_id)
/// + 4 (challenge) + 32 (hmac) + 2 (payload_len) + 199 (payload).
///
/// Exactly the maximum plaintext an RSA-2048 PKCS#1 v1.5 block can carry.
pub const PACKET_SIZE: usize = 245;

/// Freshness window applied to `timestamp`, in seconds, on both sides of
/// the server clock (handles skew).
pub const TIMESTAMP_FUZZ_SECS: u32 = 300;

/// A single knock: one authenticated action request.
///
/// Constructed and signed by the client, decoded and verified by the
/// server, then discarded after one dispatch. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnockPacket {
    /// Packet format version; must equal [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Unix seconds at packet creation.
    pub timestamp: u32,
    /// Numeric sender identity, resolved against the user registry.
    pub user_id: u16,
    /// Numeric action identity, resolved against the action registry.
    pub action_id: u8,
    /// Random anti-replay value, combined with `timestamp` into the nonce.
    pub challenge: u32,
    /// HMAC-SHA256 over the field digest. Not part of the digest itself.
    pub hmac: [u8; 32],
    /// Number of meaningful bytes in `payload`.
    pub payload_len: u16,
    /// Fixed-capacity payload buffer; bytes past `payload_len` are padding.
    pub payload: [u8; PAYLOAD_CAPACITY],
}

impl Default for KnockPacket {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            timestamp: 0,
            user_id: 0,
            action_id: 0,
            challenge: 0,
            hmac: [0u8; 32],
            payload_len: 0,
            payload: [0u8; PAYLOAD_CAPACITY],
        }
    }
}

impl KnockPacket {
    /// The meaningful prefix of the payload buffer.
    pub fn payload_bytes(&self) -> &[u8] {
        let len = (self.payload_len as usize).min(PAYLOAD_CAPACITY);
        &self.payload[..len]
    }

    /// Replay key for this packet: `"<timestamp>-<challenge>"`, both decimal.
    ///
    /// Both fields are 32-bit, so the string never exceeds 21 characters.
    pub fn nonce(&self) -> String {
        format!("{}-{}", self.timestamp, self.challenge)
    }

    /// Serialize into the fixed wire layout.
    ///
    /// The full payload capacity is always written; receivers rely on
    /// `payload_len` to find the logical end.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_SIZE);
        buf.put_u8(self.version);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.user_id);
        buf.put_u8(self.action_id);
        buf.put_u32(self.challenge);
        buf.put_slice(&self.hmac);
        buf.put_u16(self.payload_len);
        buf.put_slice(&self.payload);
        buf
    }

    /// Decode a packet from raw bytes without semantic validation.
    ///
    /// Fails if the buffer is shorter than [`PACKET_SIZE`]; trailing bytes
    /// are ignored. A decoded `payload_len` above capacity is clamped at
    /// access time by [`Self::payload_bytes`], but rejected by
    /// [`Self::validate_at`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DeserializeError> {
        if bytes.is_empty() {
            return Err(DeserializeError::EmptyInput);
        }
        if bytes.len() < PACKET_SIZE {
            return Err(DeserializeError::BufferTooShort {
                needed: PACKET_SIZE,
                got: bytes.len(),
            });
        }

        let mut buf = bytes;
        let version = buf.get_u8();
        let timestamp = buf.get_u32();
        let user_id = buf.get_u16();
        let action_id = buf.get_u8();
        let challenge = buf.get_u32();
        let mut hmac = [0u8; 32];
        buf.copy_to_slice(&mut hmac);
        let payload_len = buf.get_u16();
        let mut payload = [0u8; PAYLOAD_CAPACITY];
        buf.copy_to_slice(&mut payload);

        Ok(Self {
            version,
            timestamp,
            user_id,
            action_id,
            challenge,
            hmac,
            payload_len,
            payload,
        })
    }

    /// Semantic validation against the server clock.
    ///
    /// Checks the version gate, that `payload_len` fits the buffer, and
    /// that `timestamp` lies within `now ± TIMESTAMP_FUZZ_SECS`. Values
    /// exactly on the window edge are accepted.
    pub fn validate_at(&self, now: u32) -> Result<(), DeserializeError> {
        if self.version != PROTOCOL_VERSION {
            return Err(DeserializeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: self.version,
            });
        }

        if self.payload_len as usize > PAYLOAD_CAPACITY {
            return Err(DeserializeError::BufferTooShort {
                needed: self.payload_len as usize,
                got: PAYLOAD_CAPACITY,
            });
        }

        let lower = now.saturating_sub(TIMESTAMP_FUZZ_SECS);
        let upper = now.saturating_add(TIMESTAMP_FUZZ_SECS);
        if self.timestamp < lower || self.timestamp > upper {
            return Err(DeserializeError::StaleTimestamp {
                timestamp: self.timestamp,
                now,
            });
        }

        Ok(())
    }
}

/// Decode and validate in one step.
///
/// This is the single entry point used by the admission pipeline; any
/// failure here routes the datagram to the dead-drop matcher rather than a
/// silent drop.
pub fn deserialize(bytes: &[u8], now: u32) -> Result<KnockPacket, DeserializeError> {
    let pkt = KnockPacket::decode(bytes)?;
    pkt.validate_at(now)?;
    Ok(pkt)
}
