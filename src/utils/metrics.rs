//! Observability and Metrics
//!
//! This module provides metrics collection for monitoring daemon health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::protocol::admission::{DropReason, Verdict};

/// Counters for daemon admission outcomes.
#[derive(Debug)]
pub struct Metrics {
    /// Total datagrams received (before any processing)
    pub datagrams_received: AtomicU64,
    /// Knocks that passed every gate and spawned an action
    pub knocks_dispatched: AtomicU64,
    /// Dead-drop matches that spawned an action
    pub deaddrops_dispatched: AtomicU64,
    /// Unstructured payloads with no matching dead-drop
    pub unmatched_payloads: AtomicU64,
    /// Datagrams dropped before dispatch, all reasons
    pub drops_total: AtomicU64,
    /// Drops caused by a failed RSA unwrap
    pub decrypt_failures: AtomicU64,
    /// Drops caused by a replayed nonce
    pub replays_rejected: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            knocks_dispatched: AtomicU64::new(0),
            deaddrops_dispatched: AtomicU64::new(0),
            unmatched_payloads: AtomicU64::new(0),
            drops_total: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            replays_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one received datagram.
    pub fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admission verdict.
    pub fn record_verdict(&self, verdict: &Verdict) {
        match verdict {
            Verdict::Dispatched { .. } => {
                self.knocks_dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::DeadDrop { .. } => {
                self.deaddrops_dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Unmatched => {
                self.unmatched_payloads.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Dropped(reason) => {
                self.drops_total.fetch_add(1, Ordering::Relaxed);
                match reason {
                    DropReason::DecryptFailed => {
                        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::Replay(_) => {
                        self.replays_rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Uptime in seconds since collector creation.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Emit a one-line summary at INFO, used at shutdown.
    pub fn log_summary(&self) {
        info!(
            uptime_secs = self.uptime_seconds(),
            received = self.datagrams_received.load(Ordering::Relaxed),
            dispatched = self.knocks_dispatched.load(Ordering::Relaxed),
            deaddrops = self.deaddrops_dispatched.load(Ordering::Relaxed),
            unmatched = self.unmatched_payloads.load(Ordering::Relaxed),
            dropped = self.drops_total.load(Ordering::Relaxed),
            replays = self.replays_rejected.load(Ordering::Relaxed),
            "Daemon metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
