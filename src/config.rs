//! # Configuration Management
//!
//! Centralized configuration for the knock daemon.
//!
//! This module provides structured configuration for servers, users,
//! actions, and dead-drops, including key-material loading and validation.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation for tests
//!
//! ## Security Considerations
//! - RSA keys are loaded once at startup and shared read-only afterwards
//! - HMAC key files accept raw 32-byte or 64-hex-char content; all-zero
//!   keys are rejected
//! - Replay cache capacity and TTL are per-server knobs with safe defaults

use crate::error::{KnockError, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

/// Default replay cache capacity (ring slots).
pub const DEFAULT_REPLAY_CACHE_SIZE: usize = 128;

/// Default replay nonce TTL in seconds.
pub const DEFAULT_REPLAY_TTL_SECS: u64 = 60;

/// Main configuration structure containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct KnockConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Listener definitions; exactly one is selected at daemon startup
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,

    /// Known users and their key material
    #[serde(default, rename = "user")]
    pub users: Vec<UserConfig>,

    /// Actions a knock may request
    #[serde(default, rename = "action")]
    pub actions: Vec<ActionConfig>,

    /// Dead-drop definitions for unstructured payloads
    #[serde(default, rename = "deaddrop")]
    pub deaddrops: Vec<DeaddropConfig>,
}

impl KnockConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| KnockError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| KnockError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| KnockError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Generate example configuration file content.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Load all referenced RSA and HMAC key files into memory.
    ///
    /// Must run after parsing and before the first packet. A missing or
    /// malformed key file is a startup failure, not a per-packet one.
    pub fn load_key_material(&mut self) -> Result<()> {
        for server in &mut self.servers {
            if server.secure {
                let path = server.priv_key_file.as_ref().ok_or_else(|| {
                    KnockError::ConfigError(format!(
                        "server '{}' is secure but has no priv_key_file",
                        server.name
                    ))
                })?;
                server.priv_key = Some(Arc::new(load_private_key(path)?));
            }
        }

        for user in &mut self.users {
            if let Some(path) = &user.pubkey_file {
                user.pubkey = Some(Arc::new(load_public_key(path)?));
            }
            user.hmac_key = Some(load_hmac_key(&user.hmac_key_file)?);
        }

        Ok(())
    }

    /// Find a server definition by name.
    pub fn server_by_name(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name && s.enabled)
    }

    /// Find an enabled user by numeric id. Disabled users are invisible.
    pub fn user_by_id(&self, id: u16) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.id == id && u.enabled)
    }

    /// Name of the enabled user with the given id, if any.
    pub fn username_by_id(&self, id: u16) -> Option<&str> {
        self.user_by_id(id).map(|u| u.name.as_str())
    }

    /// Find an action by numeric id, enabled or not - the admission
    /// pipeline reports disabled actions distinctly from unknown ones.
    pub fn action_by_id(&self, id: u8) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Find a dead-drop definition by name.
    pub fn deaddrop_by_name(&self, name: &str) -> Option<&DeaddropConfig> {
        self.deaddrops.iter().find(|d| d.name == name)
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.servers.is_empty() {
            errors.push("At least one [[server]] must be defined".to_string());
        }

        for server in &self.servers {
            errors.extend(server.validate());
            for action in &server.actions {
                if !self.actions.iter().any(|a| &a.name == action) {
                    errors.push(format!(
                        "Server '{}' references unknown action '{}'",
                        server.name, action
                    ));
                }
            }
            for drop in &server.deaddrops {
                if self.deaddrop_by_name(drop).is_none() {
                    errors.push(format!(
                        "Server '{}' references unknown deaddrop '{}'",
                        server.name, drop
                    ));
                }
            }
        }

        for user in &self.users {
            errors.extend(user.validate());
            if self.users.iter().filter(|u| u.id == user.id).count() > 1 {
                errors.push(format!("Duplicate user id: {}", user.id));
            }
        }

        for action in &self.actions {
            errors.extend(action.validate());
        }

        for deaddrop in &self.deaddrops {
            errors.extend(deaddrop.validate());
        }

        errors.extend(self.logging.validate());

        errors.sort();
        errors.dedup();
        errors
    }

    /// Validate and return Result - convenience method.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(KnockError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// One UDP listener and its admission policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Numeric server identity
    pub id: u32,

    /// Section label, referenced at daemon startup
    pub name: String,

    /// Disabled servers cannot be selected
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// UDP port to bind
    pub port: u16,

    /// Whether the wire carries RSA-encrypted knocks (true) or plaintext
    /// framed packets (false)
    pub secure: bool,

    /// PEM private key used to unwrap knocks; required when `secure`
    #[serde(default)]
    pub priv_key_file: Option<PathBuf>,

    /// Actions permitted on this server, by name
    #[serde(default)]
    pub actions: Vec<String>,

    /// Dead-drops enabled on this server, by name, in match-priority order
    #[serde(default)]
    pub deaddrops: Vec<String>,

    /// When true, a knock with a bad HMAC is dropped instead of merely
    /// logged. Off by default: signature state is recorded and passed
    /// through, and the action still runs if every other check passes.
    /// Turning this on is the recommended hardening posture.
    #[serde(default)]
    pub reject_invalid_signature: bool,

    /// Replay cache ring slots
    #[serde(default = "default_replay_cache_size")]
    pub replay_cache_size: usize,

    /// Replay nonce TTL in seconds
    #[serde(default = "default_replay_ttl_secs")]
    pub replay_ttl_secs: u64,

    /// Loaded private key; populated by `load_key_material`
    #[serde(skip)]
    pub priv_key: Option<Arc<RsaPrivateKey>>,
}

impl ServerConfig {
    /// Whether an action name is on this server's allow-list.
    pub fn action_allowed(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a == name)
    }

    /// Whether a dead-drop name is enabled on this server.
    pub fn deaddrop_allowed(&self, name: &str) -> bool {
        self.deaddrops.iter().any(|d| d == name)
    }

    /// Validate server configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("Server name cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push(format!("Server '{}' has port 0", self.name));
        }

        if self.secure && self.priv_key_file.is_none() {
            errors.push(format!(
                "Server '{}' is secure but has no priv_key_file",
                self.name
            ));
        }

        if self.replay_cache_size == 0 {
            errors.push(format!(
                "Server '{}': replay cache size must be greater than 0",
                self.name
            ));
        }

        if self.replay_ttl_secs == 0 {
            errors.push(format!(
                "Server '{}': replay TTL must be greater than 0",
                self.name
            ));
        }

        errors
    }
}

/// A known sender identity and its key material.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// Numeric identity carried in the packet
    pub id: u16,

    /// Human-readable name, passed to action scripts
    pub name: String,

    /// Disabled users fail identity resolution
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// PEM public key for this user (optional; HMAC alone authenticates)
    #[serde(default)]
    pub pubkey_file: Option<PathBuf>,

    /// File holding the 32-byte HMAC key (raw or hex)
    pub hmac_key_file: PathBuf,

    /// Actions this user may request, by name
    #[serde(default)]
    pub actions: Vec<String>,

    /// Loaded public key; populated by `load_key_material`
    #[serde(skip)]
    pub pubkey: Option<Arc<RsaPublicKey>>,

    /// Loaded HMAC key; populated by `load_key_material`
    #[serde(skip)]
    pub hmac_key: Option<[u8; 32]>,
}

impl UserConfig {
    /// Validate user configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(format!("User {} has an empty name", self.id));
        }

        if self.hmac_key_file.as_os_str().is_empty() {
            errors.push(format!("User '{}' has no hmac_key_file", self.name));
        }

        errors
    }
}

/// One dispatchable action.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionConfig {
    /// Numeric identity carried in the packet
    pub id: u8,

    /// Action name, matched against server allow-lists
    pub name: String,

    /// Disabled actions are resolvable but never dispatched
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Script or binary spawned when the action fires
    pub constructor: String,

    /// Optional teardown script (run by external supervision, not the core)
    #[serde(default)]
    pub destructor: Option<String>,

    /// Require the knock payload to be printable ASCII
    #[serde(default)]
    pub require_ascii: bool,

    /// Split the constructor on whitespace into command + argument
    #[serde(default)]
    pub exec_split: bool,
}

impl ActionConfig {
    /// Validate action configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(format!("Action {} has an empty name", self.id));
        }

        if self.constructor.is_empty() {
            errors.push(format!("Action '{}' has no constructor", self.name));
        }

        errors
    }
}

/// A prefix-matched handler for unstructured payloads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeaddropConfig {
    /// Numeric identity (diagnostic only)
    pub id: u32,

    /// Section label, referenced from server deaddrop lists
    pub name: String,

    /// Disabled dead-drops never match
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Script or binary spawned on match
    pub constructor: String,

    /// Byte prefixes that select this dead-drop, in match order
    pub starts_with: Vec<String>,

    /// Require the full payload to be printable ASCII
    #[serde(default)]
    pub require_ascii: bool,

    /// Split the constructor on whitespace into command + argument
    #[serde(default)]
    pub exec_split: bool,
}

impl DeaddropConfig {
    /// Validate dead-drop configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(format!("Deaddrop {} has an empty name", self.id));
        }

        if self.constructor.is_empty() {
            errors.push(format!("Deaddrop '{}' has no constructor", self.name));
        }

        if self.starts_with.is_empty() {
            errors.push(format!(
                "Deaddrop '{}' has no starts_with prefixes",
                self.name
            ));
        }

        if self.starts_with.iter().any(|p| p.is_empty()) {
            errors.push(format!(
                "Deaddrop '{}' has an empty starts_with prefix",
                self.name
            ));
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to include module targets in log lines
    pub log_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("knockgate"),
            log_level: Level::INFO,
            log_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

fn default_true() -> bool {
    true
}

fn default_replay_cache_size() -> usize {
    DEFAULT_REPLAY_CACHE_SIZE
}

fn default_replay_ttl_secs() -> u64 {
    DEFAULT_REPLAY_TTL_SECS
}

/// Load a PEM RSA private key, accepting PKCS#8 or PKCS#1 encodings.
fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))?;

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))
}

/// Load a PEM RSA public key, accepting SPKI or PKCS#1 encodings.
fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))?;

    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))
}

/// Load and normalize a 32-byte HMAC key.
///
/// Accepts a raw 32-byte file, or a hex encoding (64 hex digits, embedded
/// whitespace tolerated). All-zero keys are rejected.
fn load_hmac_key(path: &Path) -> Result<[u8; 32]> {
    let raw = std::fs::read(path)
        .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))?;

    let bytes: Vec<u8> = if raw.len() == 32 {
        raw
    } else {
        let groomed: String = raw
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|&b| b as char)
            .collect();
        if groomed.len() != 64 {
            return Err(KnockError::KeyMaterial(format!(
                "{}: expected 32 raw bytes or 64 hex digits",
                path.display()
            )));
        }
        hex::decode(&groomed)
            .map_err(|e| KnockError::KeyMaterial(format!("{}: {e}", path.display())))?
    };

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);

    if key.iter().all(|&b| b == 0) {
        return Err(KnockError::KeyMaterial(format!(
            "{}: all-zero HMAC key rejected",
            path.display()
        )));
    }

    Ok(key)
}
