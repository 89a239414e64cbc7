//! # Knock Crypto Session
//!
//! Per-packet binding of cryptographic capability: the server's RSA
//! private key for unwrapping the outer wire layer, and - once the sender
//! identity is known - that user's HMAC key and public key for signature
//! verification.
//!
//! A session is attached to a user *after* decryption and deserialization,
//! because decryption needs only the server key while verification needs
//! identity-dependent material. Key objects are shared from the long-lived
//! configuration; the session owns nothing except a copy of the 32-byte
//! HMAC key, which is zeroized on drop.
//!
//! ## Security
//! - Decrypt failure is terminal for the packet: no plaintext fallback.
//!   Whether a wire carries ciphertext is a per-server config decision,
//!   never probed from error codes.
//! - Signature comparison is constant-time (`subtle`), not a
//!   short-circuiting byte compare.

use hmac::{Hmac, Mac};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::config::{ServerConfig, UserConfig};
use crate::core::digest;
use crate::core::packet::KnockPacket;
use crate::error::{DecryptError, KnockError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Transient key-material binding used to process one packet.
pub struct KnockSession {
    /// Server private key for unwrapping the outer layer; absent on
    /// plaintext servers.
    private_key: Option<Arc<RsaPrivateKey>>,
    /// Sender public key, linked after user resolution.
    public_key: Option<Arc<RsaPublicKey>>,
    /// Sender HMAC key, copied after user resolution; zeroized on drop.
    hmac_key: Option<Zeroizing<[u8; 32]>>,
}

impl KnockSession {
    /// Bind a session to a server's key material.
    ///
    /// Fails if the server expects encrypted traffic but no private key
    /// has been loaded - that is a startup misconfiguration, not a
    /// per-packet condition.
    pub fn for_server(server: &ServerConfig) -> Result<Self> {
        if server.secure && server.priv_key.is_none() {
            return Err(KnockError::KeyMaterial(format!(
                "server '{}' is secure but no private key is loaded",
                server.name
            )));
        }

        Ok(Self {
            private_key: server.priv_key.clone(),
            public_key: None,
            hmac_key: None,
        })
    }

    /// Attach a resolved user's key material to the session.
    ///
    /// Copies the user's HMAC key and links (not copies) the user's public
    /// key. Must be called after the packet's `user_id` is known.
    pub fn assign_user(&mut self, user: &UserConfig) -> Result<()> {
        let key = user.hmac_key.ok_or_else(|| {
            KnockError::KeyMaterial(format!("user '{}' has no loaded HMAC key", user.name))
        })?;

        self.hmac_key = Some(Zeroizing::new(key));
        self.public_key = user.pubkey.clone();

        trace!(user = %user.name, "Session attached to user");
        Ok(())
    }

    /// Unwrap the outer wire layer with the session's private key.
    ///
    /// Any failure is terminal for the packet - it is dropped, not
    /// retried, and never reinterpreted as plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
        let key = self.private_key.as_ref().ok_or(DecryptError::MissingKey)?;

        if ciphertext.is_empty() {
            return Err(DecryptError::EmptyInput);
        }

        key.decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| DecryptError::Failed)
    }

    /// HMAC-SHA256 over a precomputed digest with the session's HMAC key.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<[u8; 32]> {
        let key = self.hmac_key.as_ref().ok_or(KnockError::MissingHmacKey)?;
        Ok(sign_digest(key, digest))
    }

    /// Verify a packet's HMAC against the session's HMAC key.
    ///
    /// Recomputes the field digest, recomputes the HMAC, and compares in
    /// constant time. Returns false (never errors) on a missing key so the
    /// caller's drop/log policy applies uniformly.
    pub fn verify_signature(&self, pkt: &KnockPacket) -> bool {
        let Some(key) = self.hmac_key.as_ref() else {
            warn!("Signature check without an assigned user - rejecting");
            return false;
        };

        let digest = digest::generate(pkt);
        let expected = sign_digest(key, &digest);

        expected[..].ct_eq(&pkt.hmac[..]).into()
    }

    /// Whether a peer public key is linked.
    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }
}

/// HMAC-SHA256 of a 32-byte digest under a 32-byte key.
///
/// Shared by the client sign path and the server verify path.
pub fn sign_digest(key: &[u8; 32], digest: &[u8; 32]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(digest);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::PAYLOAD_CAPACITY;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_user(key: [u8; 32]) -> UserConfig {
        UserConfig {
            id: 7,
            name: "tester".to_string(),
            enabled: true,
            pubkey_file: None,
            hmac_key_file: Default::default(),
            actions: vec![],
            pubkey: None,
            hmac_key: Some(key),
        }
    }

    fn signed_packet(key: &[u8; 32]) -> KnockPacket {
        let mut pkt = KnockPacket {
            timestamp: 1_700_000_000,
            user_id: 7,
            action_id: 3,
            challenge: 99,
            payload_len: 2,
            ..Default::default()
        };
        pkt.payload[..2].copy_from_slice(b"hi");
        pkt.hmac = sign_digest(key, &digest::generate(&pkt));
        pkt
    }

    fn plaintext_session(user: &UserConfig) -> KnockSession {
        let mut session = KnockSession {
            private_key: None,
            public_key: None,
            hmac_key: None,
        };
        session.assign_user(user).expect("user has key material");
        session
    }

    #[test]
    fn test_signature_roundtrip() {
        let key = [0x11u8; 32];
        let session = plaintext_session(&test_user(key));
        let pkt = signed_packet(&key);
        assert!(session.verify_signature(&pkt));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let session = plaintext_session(&test_user([0x22u8; 32]));
        let pkt = signed_packet(&[0x11u8; 32]);
        assert!(!session.verify_signature(&pkt));
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let key = [0x11u8; 32];
        let session = plaintext_session(&test_user(key));
        let mut pkt = signed_packet(&key);
        pkt.payload[0] ^= 0x01;
        assert!(!session.verify_signature(&pkt));
    }

    #[test]
    fn test_padding_changes_do_not_break_signature() {
        let key = [0x11u8; 32];
        let session = plaintext_session(&test_user(key));
        let mut pkt = signed_packet(&key);
        pkt.payload[PAYLOAD_CAPACITY - 1] = 0xFF;
        assert!(session.verify_signature(&pkt), "padding is outside the digest");
    }

    #[test]
    fn test_verify_without_user_rejects() {
        let session = KnockSession {
            private_key: None,
            public_key: None,
            hmac_key: None,
        };
        let pkt = signed_packet(&[0x11u8; 32]);
        assert!(!session.verify_signature(&pkt));
    }

    #[test]
    fn test_decrypt_requires_key() {
        let session = KnockSession {
            private_key: None,
            public_key: None,
            hmac_key: None,
        };
        assert_eq!(session.decrypt(b"anything"), Err(DecryptError::MissingKey));
    }

    #[test]
    fn test_decrypt_rejects_garbage_ciphertext() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = RsaPrivateKey::new(&mut rng, 2048).expect("generate test key");
        let session = KnockSession {
            private_key: Some(Arc::new(key)),
            public_key: None,
            hmac_key: None,
        };

        // Random bytes are not a valid RSA block: must fail closed, never
        // fall through to a plaintext interpretation.
        assert_eq!(session.decrypt(&[0xA5u8; 256]), Err(DecryptError::Failed));
        assert_eq!(session.decrypt(&[]), Err(DecryptError::EmptyInput));
    }
}
