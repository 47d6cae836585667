//! Server wiring: listener, accept loop, and shared statistics.

use crate::config::Config;
use crate::connection;
use crate::pubsub::{broker, hub};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Statistics shared by every connection.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total connections accepted.
    connections_total: AtomicU64,
    /// Currently active connections.
    connections_active: AtomicU64,
    /// Total upgrade requests.
    upgrades_total: AtomicU64,
    /// Successful upgrades.
    upgrades_success: AtomicU64,
    /// Failed upgrades.
    upgrades_failed: AtomicU64,
    /// Application messages received.
    messages_received: AtomicU64,
    /// Frames written to clients.
    messages_sent: AtomicU64,
    /// Raw bytes read from clients.
    bytes_received: AtomicU64,
    /// Raw bytes written to clients.
    bytes_sent: AtomicU64,
    /// Keep-alive pings queued.
    pings_sent: AtomicU64,
}

impl ServerStats {
    /// Record a new connection.
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an upgrade attempt.
    pub fn upgrade_attempt(&self) {
        self.upgrades_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful upgrade.
    pub fn upgrade_success(&self) {
        self.upgrades_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed upgrade.
    pub fn upgrade_failed(&self) {
        self.upgrades_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reassembled application message.
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound frame.
    pub fn message_sent(&self, size: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record raw bytes read from a socket.
    pub fn bytes_received(&self, size: usize) {
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record a keep-alive ping.
    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Total connections accepted so far.
    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Connections currently active.
    pub fn connections_active(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}

/// Run the server until a shutdown signal arrives.
///
/// Binds the listener, spawns the broker client and the fanout hub, and
/// accepts connections in a loop. Bind failures surface to the caller.
pub async fn run(config: Config) -> io::Result<()> {
    let addr = config.listener.socket_addr().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "invalid bind address {}:{}",
                config.listener.address, config.listener.port
            ),
        )
    })?;

    let (broker_events_tx, broker_events_rx) = mpsc::unbounded_channel();
    let (broker_handle, broker_task) = broker::spawn(config.broker.url(), broker_events_tx);
    let (hub_handle, hub_task) = hub::spawn(broker_handle.clone(), broker_events_rx);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, broker = %config.broker.url(), "listening for websocket clients");

    let stats = Arc::new(ServerStats::default());
    let mut next_subscriber: u64 = 1;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let subscriber = next_subscriber;
                    next_subscriber += 1;
                    debug!(subscriber, %peer, "accepted connection");
                    tokio::spawn(connection::run_connection(
                        subscriber,
                        stream,
                        peer,
                        config.protocol.clone(),
                        config.limits.clone(),
                        hub_handle.clone(),
                        stats.clone(),
                    ));
                }
                Err(error) => {
                    debug!(%error, "accept error");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    broker_handle.shutdown();
    let _ = broker_task.await;
    hub_task.abort();
    info!(
        connections = stats.connections_total(),
        "server stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let stats = ServerStats::default();
        stats.connection_opened();
        assert_eq!(stats.connections_total(), 1);
        assert_eq!(stats.connections_active(), 1);

        stats.connection_closed();
        assert_eq!(stats.connections_active(), 0);

        stats.message_received();
        stats.message_sent(64);
        stats.bytes_received(128);
        stats.ping_sent();
        assert_eq!(stats.messages_received.load(Ordering::Relaxed), 1);
        assert_eq!(stats.messages_sent.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_sent.load(Ordering::Relaxed), 64);
        assert_eq!(stats.bytes_received.load(Ordering::Relaxed), 128);
        assert_eq!(stats.pings_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_upgrade_counters() {
        let stats = ServerStats::default();
        stats.upgrade_attempt();
        stats.upgrade_attempt();
        stats.upgrade_success();
        stats.upgrade_failed();
        assert_eq!(stats.upgrades_total.load(Ordering::Relaxed), 2);
        assert_eq!(stats.upgrades_success.load(Ordering::Relaxed), 1);
        assert_eq!(stats.upgrades_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_run_rejects_invalid_bind_address() {
        let mut config = Config::default();
        config.listener.address = "not an address".to_string();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(run(config));
        assert!(result.is_err());
    }
}
