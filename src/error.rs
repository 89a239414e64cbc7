//! # Error Types
//!
//! Comprehensive error handling for the knock admission pipeline.
//!
//! This module defines all error variants that can occur while admitting a
//! knock, from low-level I/O errors to authentication failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and key-file failures
//! - **Decrypt Errors**: RSA unwrap failures on secure servers
//! - **Deserialize Errors**: Short buffers, version mismatches, stale timestamps
//! - **Identity Errors**: Unknown or disabled users and actions
//! - **Replay Errors**: Duplicate nonces inside the TTL window
//!
//! Per-packet errors are always handled inside the admission loop - only
//! startup-time failures (config, key files, socket bind) terminate the
//! daemon. All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Admission pipeline errors
    pub const ERR_REPLAY_DETECTED: &str = "Replay detected - nonce already seen inside TTL window";
    pub const ERR_SIGNATURE_MISMATCH: &str = "HMAC signature mismatch";
    pub const ERR_UNKNOWN_USER: &str = "No matching enabled user for packet user id";
    pub const ERR_UNKNOWN_ACTION: &str = "No matching action for packet action id";
    pub const ERR_ACTION_NOT_ALLOWED: &str = "Action not permitted on this server";
    pub const ERR_ACTION_DISABLED: &str = "Action is disabled";

    /// Crypto errors
    pub const ERR_MISSING_PRIVATE_KEY: &str = "Secure server has no loaded private key";
    pub const ERR_MISSING_HMAC_KEY: &str = "Session has no HMAC key - assign a user first";
    pub const ERR_DECRYPT_FAILED: &str = "RSA decryption failed";

    /// Transport errors
    pub const ERR_OVERSIZED_DATAGRAM: &str = "Dropping oversized datagram";
    pub const ERR_BIND_FAILED: &str = "Failed to bind UDP socket";

    /// Configuration errors
    pub const ERR_SERVER_NOT_FOUND: &str = "No such server in configuration";
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// Reason codes for a failed RSA unwrap of the outer wire layer.
///
/// Decrypt failure is terminal for the packet on a secure server - there is
/// no plaintext fallback. Whether a datagram is encrypted is a per-server
/// configuration decision, never probed from error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptError {
    #[error("no private key bound to session")]
    MissingKey,

    #[error("empty ciphertext")]
    EmptyInput,

    #[error("RSA decryption failed (bad padding, wrong key, or malformed ciphertext)")]
    Failed,
}

/// Reason codes for a failed decode of the inner wire layer.
///
/// Any of these routes the datagram to the dead-drop matcher rather than a
/// silent drop - valid dead-drop traffic is, by design, not a structured
/// packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("empty input buffer")]
    EmptyInput,

    #[error("buffer too short for knock packet: need {needed} bytes, got {got}")]
    BufferTooShort { needed: usize, got: usize },

    #[error("unsupported packet version: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("timestamp {timestamp} outside freshness window around {now}")]
    StaleTimestamp { timestamp: u32, now: u32 },
}

/// KnockError is the primary error type for all daemon operations.
#[derive(Error, Debug)]
pub enum KnockError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("deserialize error: {0}")]
    Deserialize(#[from] DeserializeError),

    #[error("unknown or disabled user id: {0}")]
    UnknownUser(u16),

    #[error("unknown action id: {0}")]
    UnknownAction(u8),

    #[error("action '{0}' not permitted on this server")]
    ActionNotAllowed(String),

    #[error("action '{0}' is disabled")]
    ActionDisabled(String),

    #[error("replay detected for nonce {0}")]
    Replay(String),

    #[error("signature mismatch for user id {0}")]
    SignatureMismatch(u16),

    #[error("payload too large: {0} bytes")]
    OversizedPayload(usize),

    #[error("session has no HMAC key")]
    MissingHmacKey,

    #[error("session has no peer public key")]
    MissingPublicKey,

    #[error("key material error: {0}")]
    KeyMaterial(String),

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("failed to spawn action process: {0}")]
    SpawnError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using KnockError
pub type Result<T> = std::result::Result<T, KnockError>;
