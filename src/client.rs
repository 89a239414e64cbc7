//! # Knock Construction
//!
//! The client side of the protocol: fill a packet, sign it with the
//! user's HMAC key, and - for secure servers - seal it with the server's
//! RSA public key. Built on the same codec and digest as the admission
//! path, so the two sides cannot drift apart.

use rand::Rng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::core::digest;
use crate::core::packet::{KnockPacket, PAYLOAD_CAPACITY};
use crate::crypto::sign_digest;
use crate::error::{KnockError, Result};
use crate::utils::time;

/// Build an unsigned packet with the given identity and payload.
///
/// Fails if the payload exceeds the fixed buffer capacity.
pub fn build_packet(
    user_id: u16,
    action_id: u8,
    payload: &[u8],
    timestamp: u32,
    challenge: u32,
) -> Result<KnockPacket> {
    if payload.len() > PAYLOAD_CAPACITY {
        return Err(KnockError::OversizedPayload(payload.len()));
    }

    let mut pkt = KnockPacket {
        timestamp,
        user_id,
        action_id,
        challenge,
        payload_len: payload.len() as u16,
        ..Default::default()
    };
    pkt.payload[..payload.len()].copy_from_slice(payload);
    Ok(pkt)
}

/// Populate the packet's `hmac` field from its current contents.
///
/// Must be called after every other field is final - the signature covers
/// all of them.
pub fn sign_packet(pkt: &mut KnockPacket, hmac_key: &[u8; 32]) {
    let d = digest::generate(pkt);
    pkt.hmac = sign_digest(hmac_key, &d);
}

/// Seal a signed packet for a secure server.
///
/// One RSA-PKCS1v1.5 block: a whole 245-byte packet fits exactly into an
/// RSA-2048 encryption.
pub fn seal(pkt: &KnockPacket, server_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    server_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, &pkt.encode())
        .map_err(|e| KnockError::EncryptionFailure(e.to_string()))
}

/// Build, sign, and encode a complete knock in one call.
///
/// Uses the current clock and a random challenge. Pass a `server_key` to
/// seal for a secure server, or `None` for a plaintext server.
pub fn knock_bytes(
    user_id: u16,
    action_id: u8,
    payload: &[u8],
    hmac_key: &[u8; 32],
    server_key: Option<&RsaPublicKey>,
) -> Result<Vec<u8>> {
    let challenge: u32 = rand::thread_rng().gen();
    let mut pkt = build_packet(user_id, action_id, payload, time::unix_now_u32(), challenge)?;
    sign_packet(&mut pkt, hmac_key);

    match server_key {
        Some(key) => seal(&pkt, key),
        None => Ok(pkt.encode()),
    }
}
