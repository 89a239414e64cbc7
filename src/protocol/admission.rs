//! The per-datagram admission pipeline.
//!
//! Orchestrates decrypt → deserialize → identity resolution → signature
//! verification → replay check → dispatch, with deserialize failures
//! branching into the dead-drop matcher. Every dependency is passed in at
//! construction; the pipeline holds no global state.
//!
//! ## State machine
//! ```text
//! Received ──decrypt──▶ DecryptFailed (drop)
//!     │
//! Deserialized ──fail──▶ dead-drop matcher
//!     │
//! UserResolved ──unknown/disabled──▶ drop
//!     │
//! SignatureChecked  (recorded; gating only with reject_invalid_signature)
//!     │
//! ReplayChecked ──duplicate──▶ drop
//!     │
//! ActionResolved ──unknown/disabled/not-allowed──▶ drop
//!     │
//! Dispatched
//! ```
//!
//! Every failure path is a silent drop from the network's perspective -
//! the daemon never answers, so probing cannot distinguish failure modes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::KnockConfig;
use crate::core::packet::{self, KnockPacket};
use crate::crypto::KnockSession;
use crate::error::constants;
use crate::error::{KnockError, Result};
use crate::protocol::deaddrop;
use crate::protocol::router::ActionRouter;
use crate::utils::replay_cache::ReplayCache;
use crate::utils::time;

/// Why a datagram was dropped without dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// RSA unwrap failed on a secure server.
    DecryptFailed,
    /// No enabled user with the packet's user id.
    UnknownUser(u16),
    /// User resolved but key material was not loaded.
    MissingKeyMaterial(u16),
    /// HMAC mismatch, with `reject_invalid_signature` enabled.
    InvalidSignature(u16),
    /// Nonce already seen inside the TTL window.
    Replay(String),
    /// No action with the packet's action id.
    UnknownAction(u8),
    /// Action exists but is disabled.
    ActionDisabled(String),
    /// Action exists but is not on this server's allow-list.
    ActionNotAllowed(String),
    /// The action or dead-drop process failed to spawn.
    SpawnFailed,
}

/// Outcome of admitting one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A structured knock passed every gate and its action was spawned.
    Dispatched {
        /// Authenticated sender.
        user_id: u16,
        /// Dispatched action name.
        action: String,
    },
    /// An unstructured payload matched a dead-drop and its action was spawned.
    DeadDrop {
        /// Matched dead-drop name.
        name: String,
    },
    /// Unstructured payload with no matching dead-drop; logged only.
    Unmatched,
    /// Dropped before dispatch.
    Dropped(DropReason),
}

/// The admission pipeline for one configured server.
///
/// Single-threaded by design: the daemon loop processes one datagram to
/// completion before receiving the next, so the replay cache needs no
/// interior locking. Anyone introducing concurrent packet processing must
/// wrap the cache (check + add is a read-modify-write) in a mutex first.
pub struct AdmissionPipeline<R: ActionRouter> {
    config: Arc<KnockConfig>,
    server_idx: usize,
    session: KnockSession,
    replay: ReplayCache,
    router: R,
}

impl<R: ActionRouter> AdmissionPipeline<R> {
    /// Build a pipeline for the named server.
    ///
    /// Fails if the server is unknown or disabled, or if it expects
    /// encrypted traffic without a loaded private key.
    pub fn new(config: Arc<KnockConfig>, server_name: &str, router: R) -> Result<Self> {
        let server_idx = config
            .servers
            .iter()
            .position(|s| s.name == server_name && s.enabled)
            .ok_or_else(|| {
                KnockError::ConfigError(format!(
                    "{}: '{server_name}'",
                    constants::ERR_SERVER_NOT_FOUND
                ))
            })?;

        let server = &config.servers[server_idx];
        let session = KnockSession::for_server(server)?;
        let replay = ReplayCache::with_settings(
            server.replay_cache_size,
            Duration::from_secs(server.replay_ttl_secs),
        );

        Ok(Self {
            config,
            server_idx,
            session,
            replay,
            router,
        })
    }

    /// The router this pipeline dispatches through.
    pub fn router(&self) -> &R {
        &self.router
    }

    /// Admit one datagram.
    ///
    /// Never returns an error: every per-packet failure is logged and
    /// folded into the [`Verdict`], so a hostile peer cannot take the
    /// daemon down through this path.
    pub fn handle_datagram(&mut self, datagram: &[u8], source: IpAddr) -> Verdict {
        let secure = self.config.servers[self.server_idx].secure;

        // Outer layer: RSA unwrap on secure servers, passthrough otherwise.
        // A failed unwrap is terminal - encrypted-or-not is configuration,
        // so the raw bytes are never reinterpreted as plaintext.
        let normalized: Cow<'_, [u8]> = if secure {
            match self.session.decrypt(datagram) {
                Ok(plain) => Cow::Owned(plain),
                Err(e) => {
                    warn!(%source, error = %e, "{}", constants::ERR_DECRYPT_FAILED);
                    return Verdict::Dropped(DropReason::DecryptFailed);
                }
            }
        } else {
            Cow::Borrowed(datagram)
        };

        let now = time::unix_now();
        match packet::deserialize(&normalized, now as u32) {
            Ok(pkt) => {
                debug!(
                    %source,
                    user_id = pkt.user_id,
                    action_id = pkt.action_id,
                    "Valid knock packet"
                );
                self.handle_structured(&pkt, source, now)
            }
            Err(e) => {
                debug!(%source, error = %e, "Not a knock packet - trying dead-drop path");
                self.handle_unstructured(&normalized, source)
            }
        }
    }

    /// Structured path: authenticate, replay-check, and dispatch a knock.
    fn handle_structured(&mut self, pkt: &KnockPacket, source: IpAddr, now: u64) -> Verdict {
        let server = &self.config.servers[self.server_idx];

        let Some(user) = self.config.user_by_id(pkt.user_id) else {
            warn!(%source, user_id = pkt.user_id, "{}", constants::ERR_UNKNOWN_USER);
            return Verdict::Dropped(DropReason::UnknownUser(pkt.user_id));
        };

        if let Err(e) = self.session.assign_user(user) {
            warn!(%source, user = %user.name, error = %e, "Failed to attach session to user");
            return Verdict::Dropped(DropReason::MissingKeyMaterial(pkt.user_id));
        }

        // Signature state is recorded but, by default, does not gate
        // dispatch - the packet proceeds if every other check passes.
        let signature_valid = self.session.verify_signature(pkt);
        if !signature_valid {
            warn!(
                %source,
                user_id = pkt.user_id,
                "{}", constants::ERR_SIGNATURE_MISMATCH
            );
            if server.reject_invalid_signature {
                return Verdict::Dropped(DropReason::InvalidSignature(pkt.user_id));
            }
        }

        let nonce = pkt.nonce();
        if self.replay.check(&nonce, now) {
            warn!(%source, nonce = %nonce, "{}", constants::ERR_REPLAY_DETECTED);
            return Verdict::Dropped(DropReason::Replay(nonce));
        }
        self.replay.add(&nonce, now);

        let Some(action) = self.config.action_by_id(pkt.action_id) else {
            warn!(%source, action_id = pkt.action_id, "{}", constants::ERR_UNKNOWN_ACTION);
            return Verdict::Dropped(DropReason::UnknownAction(pkt.action_id));
        };

        if !server.action_allowed(&action.name) {
            warn!(%source, action = %action.name, "{}", constants::ERR_ACTION_NOT_ALLOWED);
            return Verdict::Dropped(DropReason::ActionNotAllowed(action.name.clone()));
        }

        if !action.enabled {
            warn!(%source, action = %action.name, "{}", constants::ERR_ACTION_DISABLED);
            return Verdict::Dropped(DropReason::ActionDisabled(action.name.clone()));
        }

        let args = vec![
            source.to_string(),
            pkt.user_id.to_string(),
            user.name.clone(),
            pkt.action_id.to_string(),
            action.name.clone(),
            if server.secure { "1" } else { "0" }.to_string(),
            BASE64.encode(pkt.payload_bytes()),
        ];

        info!(
            %source,
            user = %user.name,
            action = %action.name,
            signature_valid,
            "Dispatching knock"
        );

        match self.router.dispatch(&action.constructor, &args, action.exec_split) {
            Ok(()) => Verdict::Dispatched {
                user_id: pkt.user_id,
                action: action.name.clone(),
            },
            Err(e) => {
                warn!(%source, action = %action.name, error = %e, "Action spawn failed");
                Verdict::Dropped(DropReason::SpawnFailed)
            }
        }
    }

    /// Unstructured path: prefix-match against the server's dead-drops.
    fn handle_unstructured(&mut self, payload: &[u8], source: IpAddr) -> Verdict {
        let server = &self.config.servers[self.server_idx];

        let Some((drop, prefix_len)) = deaddrop::match_prefix(&self.config, server, payload)
        else {
            deaddrop::log_unmatched(payload);
            return Verdict::Unmatched;
        };

        if drop.require_ascii && !deaddrop::is_printable_ascii(payload) {
            debug!(
                %source,
                deaddrop = %drop.name,
                "Dead-drop matched but payload contains non-ASCII bytes"
            );
            deaddrop::log_unmatched(payload);
            return Verdict::Unmatched;
        }

        // Strip the matched prefix so the trigger string does not appear
        // in the action's argument.
        let args = vec![
            source.to_string(),
            drop.name.clone(),
            if server.secure { "1" } else { "0" }.to_string(),
            BASE64.encode(&payload[prefix_len..]),
        ];

        info!(%source, deaddrop = %drop.name, "Dispatching dead-drop");

        match self.router.dispatch(&drop.constructor, &args, drop.exec_split) {
            Ok(()) => Verdict::DeadDrop {
                name: drop.name.clone(),
            },
            Err(e) => {
                warn!(%source, deaddrop = %drop.name, error = %e, "Dead-drop spawn failed");
                Verdict::Dropped(DropReason::SpawnFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionConfig, DeaddropConfig, ServerConfig, UserConfig};
    use crate::core::digest;
    use crate::crypto::sign_digest;
    use crate::protocol::router::RecordingRouter;
    use std::net::Ipv4Addr;

    const HMAC_KEY: [u8; 32] = [0x11; 32];

    fn test_config() -> KnockConfig {
        KnockConfig {
            servers: vec![ServerConfig {
                id: 1,
                name: "edge".to_string(),
                enabled: true,
                port: 50221,
                secure: false,
                priv_key_file: None,
                actions: vec!["grant".to_string()],
                deaddrops: vec!["ping".to_string()],
                reject_invalid_signature: false,
                replay_cache_size: 128,
                replay_ttl_secs: 60,
                priv_key: None,
            }],
            users: vec![UserConfig {
                id: 7,
                name: "mallory".to_string(),
                enabled: true,
                pubkey_file: None,
                hmac_key_file: Default::default(),
                actions: vec!["grant".to_string()],
                pubkey: None,
                hmac_key: Some(HMAC_KEY),
            }],
            actions: vec![ActionConfig {
                id: 3,
                name: "grant".to_string(),
                enabled: true,
                constructor: "/usr/local/bin/grant.sh".to_string(),
                destructor: None,
                require_ascii: false,
                exec_split: false,
            }],
            deaddrops: vec![DeaddropConfig {
                id: 1,
                name: "ping".to_string(),
                enabled: true,
                constructor: "/usr/local/bin/ping.sh".to_string(),
                starts_with: vec!["PING-".to_string()],
                require_ascii: false,
                exec_split: false,
            }],
            ..Default::default()
        }
    }

    fn pipeline() -> AdmissionPipeline<RecordingRouter> {
        AdmissionPipeline::new(Arc::new(test_config()), "edge", RecordingRouter::new())
            .expect("pipeline builds")
    }

    fn signed_knock(payload: &[u8]) -> Vec<u8> {
        let mut pkt = KnockPacket {
            timestamp: time::unix_now_u32(),
            user_id: 7,
            action_id: 3,
            challenge: rand::random(),
            payload_len: payload.len() as u16,
            ..Default::default()
        };
        pkt.payload[..payload.len()].copy_from_slice(payload);
        pkt.hmac = sign_digest(&HMAC_KEY, &digest::generate(&pkt));
        pkt.encode()
    }

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))
    }

    #[test]
    fn test_valid_knock_dispatches_with_expected_args() {
        let mut p = pipeline();
        let verdict = p.handle_datagram(&signed_knock(b"hi"), source());

        assert_eq!(
            verdict,
            Verdict::Dispatched {
                user_id: 7,
                action: "grant".to_string()
            }
        );

        let calls = p.router().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].constructor, "/usr/local/bin/grant.sh");
        assert_eq!(
            calls[0].args,
            vec![
                "203.0.113.9".to_string(),
                "7".to_string(),
                "mallory".to_string(),
                "3".to_string(),
                "grant".to_string(),
                "0".to_string(),
                BASE64.encode(b"hi"),
            ]
        );
    }

    #[test]
    fn test_replay_is_rejected_second_time() {
        let mut p = pipeline();
        let knock = signed_knock(b"hi");

        assert!(matches!(
            p.handle_datagram(&knock, source()),
            Verdict::Dispatched { .. }
        ));
        assert!(matches!(
            p.handle_datagram(&knock, source()),
            Verdict::Dropped(DropReason::Replay(_))
        ));
        assert_eq!(p.router().calls().len(), 1, "router invoked exactly once");
    }

    #[test]
    fn test_unknown_user_dropped() {
        let mut p = pipeline();
        let mut pkt = KnockPacket {
            timestamp: time::unix_now_u32(),
            user_id: 99,
            action_id: 3,
            challenge: 1,
            ..Default::default()
        };
        pkt.hmac = sign_digest(&HMAC_KEY, &digest::generate(&pkt));

        assert_eq!(
            p.handle_datagram(&pkt.encode(), source()),
            Verdict::Dropped(DropReason::UnknownUser(99))
        );
    }

    #[test]
    fn test_invalid_signature_dispatches_by_default() {
        let mut p = pipeline();
        let mut knock = signed_knock(b"hi");
        // Corrupt the hmac field (bytes 12..44 of the wire layout).
        knock[12] ^= 0xFF;

        assert!(
            matches!(p.handle_datagram(&knock, source()), Verdict::Dispatched { .. }),
            "bad signature is logged but does not gate dispatch by default"
        );
    }

    #[test]
    fn test_invalid_signature_dropped_when_rejection_enabled() {
        let mut config = test_config();
        config.servers[0].reject_invalid_signature = true;
        let mut p = AdmissionPipeline::new(Arc::new(config), "edge", RecordingRouter::new())
            .expect("pipeline builds");

        let mut knock = signed_knock(b"hi");
        knock[12] ^= 0xFF;

        assert_eq!(
            p.handle_datagram(&knock, source()),
            Verdict::Dropped(DropReason::InvalidSignature(7))
        );
        assert!(p.router().calls().is_empty());
    }

    #[test]
    fn test_action_not_on_allow_list_dropped() {
        let mut config = test_config();
        config.servers[0].actions.clear();
        let mut p = AdmissionPipeline::new(Arc::new(config), "edge", RecordingRouter::new())
            .expect("pipeline builds");

        assert_eq!(
            p.handle_datagram(&signed_knock(b"hi"), source()),
            Verdict::Dropped(DropReason::ActionNotAllowed("grant".to_string()))
        );
    }

    #[test]
    fn test_disabled_action_dropped() {
        let mut config = test_config();
        config.actions[0].enabled = false;
        let mut p = AdmissionPipeline::new(Arc::new(config), "edge", RecordingRouter::new())
            .expect("pipeline builds");

        assert_eq!(
            p.handle_datagram(&signed_knock(b"hi"), source()),
            Verdict::Dropped(DropReason::ActionDisabled("grant".to_string()))
        );
    }

    #[test]
    fn test_unstructured_payload_routes_to_deaddrop() {
        let mut p = pipeline();
        let verdict = p.handle_datagram(b"PING-alert-1", source());

        assert_eq!(
            verdict,
            Verdict::DeadDrop {
                name: "ping".to_string()
            }
        );

        let calls = p.router().calls();
        assert_eq!(calls[0].constructor, "/usr/local/bin/ping.sh");
        assert_eq!(
            calls[0].args,
            vec![
                "203.0.113.9".to_string(),
                "ping".to_string(),
                "0".to_string(),
                BASE64.encode(b"alert-1"),
            ]
        );
    }

    #[test]
    fn test_unmatched_payload_fires_nothing() {
        let mut p = pipeline();
        assert_eq!(p.handle_datagram(b"garbage", source()), Verdict::Unmatched);
        assert!(p.router().calls().is_empty());
    }

    #[test]
    fn test_require_ascii_gates_deaddrop() {
        let mut config = test_config();
        config.deaddrops[0].require_ascii = true;
        let mut p = AdmissionPipeline::new(Arc::new(config), "edge", RecordingRouter::new())
            .expect("pipeline builds");

        assert_eq!(
            p.handle_datagram(b"PING-\xFF\xFE", source()),
            Verdict::Unmatched
        );
        assert!(p.router().calls().is_empty());
    }

    #[test]
    fn test_stale_packet_falls_through_to_deaddrop_path() {
        let mut p = pipeline();
        let mut pkt = KnockPacket {
            timestamp: time::unix_now_u32() - 3600,
            user_id: 7,
            action_id: 3,
            challenge: 1,
            ..Default::default()
        };
        pkt.hmac = sign_digest(&HMAC_KEY, &digest::generate(&pkt));

        // A stale-but-structured packet fails deserialization and lands in
        // the dead-drop matcher, which finds nothing.
        assert_eq!(p.handle_datagram(&pkt.encode(), source()), Verdict::Unmatched);
    }

    #[test]
    fn test_unknown_server_rejected_at_construction() {
        assert!(
            AdmissionPipeline::new(Arc::new(test_config()), "nope", RecordingRouter::new())
                .is_err()
        );
    }
}
