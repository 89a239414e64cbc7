//! UDP daemon loop.
//!
//! One blocking-equivalent receive at a time: each datagram is admitted to
//! completion before the next is read, which keeps the replay cache free
//! of interior locking. The only concurrency is the action router's
//! fire-and-forget process spawn, which the loop does not wait on.
//!
//! Shutdown is observed between packets, never mid-admission: a ctrl-c
//! handler feeds an internal channel that the select loop polls each
//! iteration.

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{KnockConfig, ServerConfig};
use crate::error::{constants, KnockError, Result};
use crate::protocol::admission::AdmissionPipeline;
use crate::protocol::router::ActionRouter;
use crate::utils::metrics::Metrics;

/// Largest accepted datagram. A knock is one RSA block (256 bytes for
/// RSA-2048) or 245 plaintext bytes; anything near this limit is noise.
pub const MAX_DATAGRAM: usize = 1024;

/// Bind the server's UDP socket.
///
/// A bind failure is a startup error and terminates the daemon - it is
/// the environment refusing us, not a hostile packet.
pub async fn bind_socket(server: &ServerConfig) -> Result<UdpSocket> {
    let addr = format!("0.0.0.0:{}", server.port);
    let socket = UdpSocket::bind(&addr).await.map_err(|e| {
        error!(%addr, error = %e, "{}", constants::ERR_BIND_FAILED);
        KnockError::Io(e)
    })?;

    info!(port = server.port, server = %server.name, "Daemon listening on UDP");
    Ok(socket)
}

/// Run the daemon for the named server until ctrl-c.
pub async fn run<R: ActionRouter>(
    config: Arc<KnockConfig>,
    server_name: &str,
    router: R,
) -> Result<()> {
    // Create internal shutdown channel fed by the ctrl-c handler.
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    run_with_shutdown(config, server_name, router, shutdown_rx).await
}

/// Run the daemon with an external shutdown channel.
///
/// In-flight admission is never interrupted; the shutdown signal is
/// observed between datagrams.
pub async fn run_with_shutdown<R: ActionRouter>(
    config: Arc<KnockConfig>,
    server_name: &str,
    router: R,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let server = config.server_by_name(server_name).ok_or_else(|| {
        KnockError::ConfigError(format!(
            "{}: '{server_name}'",
            constants::ERR_SERVER_NOT_FOUND
        ))
    })?;

    let socket = bind_socket(server).await?;
    let mut pipeline = AdmissionPipeline::new(config.clone(), server_name, router)?;
    let metrics = Metrics::new();

    // One extra byte so an oversized datagram is detectable rather than
    // silently truncated by the kernel.
    let mut buf = [0u8; MAX_DATAGRAM + 1];
    let mut packet_count: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down daemon loop");
                metrics.log_summary();
                return Ok(());
            }

            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((n, peer)) => {
                        metrics.datagram_received();
                        if n > MAX_DATAGRAM {
                            warn!(bytes = n, %peer, "{}", constants::ERR_OVERSIZED_DATAGRAM);
                            continue;
                        }

                        packet_count += 1;
                        if packet_count % 100 == 0 {
                            debug!(packet_count, "Processed candidate packets");
                        }

                        let verdict = pipeline.handle_datagram(&buf[..n], peer.ip());
                        metrics.record_verdict(&verdict);
                        debug!(?verdict, %peer, "Datagram admitted");
                    }
                    Err(e) => {
                        // Transient receive errors never take the loop down.
                        error!(error = %e, "recv_from failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::router::RecordingRouter;
    use std::time::Duration;

    fn loopback_config(port: u16) -> KnockConfig {
        KnockConfig {
            servers: vec![ServerConfig {
                id: 1,
                name: "test".to_string(),
                enabled: true,
                port,
                secure: false,
                priv_key_file: None,
                actions: vec![],
                deaddrops: vec![],
                reject_invalid_signature: false,
                replay_cache_size: 128,
                replay_ttl_secs: 60,
                priv_key: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let config = Arc::new(loopback_config(48731));

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_with_shutdown(
            config,
            "test",
            RecordingRouter::new(),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).await.expect("shutdown channel open");

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits after shutdown")
            .expect("task not panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_server_fails_startup() {
        let config = Arc::new(loopback_config(48732));
        let (_tx, rx) = mpsc::channel(1);
        let result = run_with_shutdown(config, "missing", RecordingRouter::new(), rx).await;
        assert!(result.is_err());
    }
}
