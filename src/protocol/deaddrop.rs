//! Dead-drop matching for unstructured payloads.
//!
//! Datagrams that fail structured deserialization are not silently
//! dropped: they may be dead-drop traffic, which by design is not a knock
//! packet. A dead-drop is selected by byte prefix, restricted to the
//! drops enabled on the current server.
//!
//! Matching is first-match-wins in configured order - the server's
//! dead-drop list first, then each drop's `starts_with` prefixes - never
//! longest-prefix.

use tracing::{debug, warn};

use crate::config::{DeaddropConfig, KnockConfig, ServerConfig};

/// Hex-dump truncation limit for unmatched payload diagnostics.
const DUMP_LIMIT: usize = 512;

/// Find the first enabled dead-drop whose prefix starts the payload.
///
/// Returns the matched definition and the length of the matched prefix so
/// the caller can strip it before forwarding.
pub fn match_prefix<'a>(
    config: &'a KnockConfig,
    server: &ServerConfig,
    payload: &[u8],
) -> Option<(&'a DeaddropConfig, usize)> {
    if payload.is_empty() {
        return None;
    }

    for name in &server.deaddrops {
        let Some(drop) = config.deaddrop_by_name(name) else {
            continue;
        };
        if !drop.enabled {
            continue;
        }

        for prefix in &drop.starts_with {
            let prefix = prefix.as_bytes();
            if prefix.len() <= payload.len() && &payload[..prefix.len()] == prefix {
                return Some((drop, prefix.len()));
            }
        }
    }

    None
}

/// Whether every byte is printable ASCII (space through tilde).
pub fn is_printable_ascii(buf: &[u8]) -> bool {
    buf.iter().all(|&b| (32..=126).contains(&b))
}

/// Diagnostic logging for payloads that matched no dead-drop.
///
/// ASCII payloads are logged verbatim; binary payloads as a truncated hex
/// dump. No action fires and no response is ever sent.
pub fn log_unmatched(payload: &[u8]) {
    if payload.is_empty() {
        return;
    }

    if is_printable_ascii(payload) {
        warn!("Unmatched payload is ASCII but not a valid packet");
        debug!(payload = %String::from_utf8_lossy(payload), "Unmatched ASCII payload");
    } else {
        warn!("Unmatched payload is binary and not a valid packet");
        let shown = &payload[..payload.len().min(DUMP_LIMIT)];
        let mut dump = hex::encode_upper(shown);
        if payload.len() > DUMP_LIMIT {
            dump.push_str("... (truncated)");
        }
        debug!(payload = %dump, "Unmatched binary payload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnockConfig;

    fn config_with_drops(order: &[&str]) -> (KnockConfig, ServerConfig) {
        let mk = |id: u32, name: &str, prefixes: &[&str]| DeaddropConfig {
            id,
            name: name.to_string(),
            enabled: true,
            constructor: format!("/opt/{name}.sh"),
            starts_with: prefixes.iter().map(|p| p.to_string()).collect(),
            require_ascii: false,
            exec_split: false,
        };

        let config = KnockConfig {
            deaddrops: vec![mk(1, "short", &["AB"]), mk(2, "long", &["ABC"])],
            ..Default::default()
        };

        let server = ServerConfig {
            id: 1,
            name: "edge".to_string(),
            enabled: true,
            port: 50221,
            secure: false,
            priv_key_file: None,
            actions: vec![],
            deaddrops: order.iter().map(|d| d.to_string()).collect(),
            reject_invalid_signature: false,
            replay_cache_size: 128,
            replay_ttl_secs: 60,
            priv_key: None,
        };

        (config, server)
    }

    #[test]
    fn test_first_match_wins_not_longest() {
        let (config, server) = config_with_drops(&["short", "long"]);
        let (drop, len) = match_prefix(&config, &server, b"ABCxyz").expect("matches");
        assert_eq!(drop.name, "short");
        assert_eq!(len, 2);

        // Reversing the server order flips the winner - match order is
        // configuration order, not prefix length.
        let (config, server) = config_with_drops(&["long", "short"]);
        let (drop, len) = match_prefix(&config, &server, b"ABCxyz").expect("matches");
        assert_eq!(drop.name, "long");
        assert_eq!(len, 3);
    }

    #[test]
    fn test_disabled_drop_is_skipped() {
        let (mut config, server) = config_with_drops(&["short", "long"]);
        config.deaddrops[0].enabled = false;
        let (drop, _) = match_prefix(&config, &server, b"ABCxyz").expect("matches");
        assert_eq!(drop.name, "long");
    }

    #[test]
    fn test_no_match_on_unlisted_drop() {
        let (config, server) = config_with_drops(&["long"]);
        assert!(match_prefix(&config, &server, b"ABxyz").is_none());
    }

    #[test]
    fn test_prefix_longer_than_payload_does_not_match() {
        let (config, server) = config_with_drops(&["long"]);
        assert!(match_prefix(&config, &server, b"AB").is_none());
    }

    #[test]
    fn test_empty_payload_never_matches() {
        let (config, server) = config_with_drops(&["short"]);
        assert!(match_prefix(&config, &server, b"").is_none());
    }

    #[test]
    fn test_printable_ascii_bounds() {
        assert!(is_printable_ascii(b"PING-alert 1"));
        assert!(is_printable_ascii(b" ~"));
        assert!(!is_printable_ascii(b"PING\x1f"));
        assert!(!is_printable_ascii(&[0x7f]));
        assert!(is_printable_ascii(b""));
    }
}
