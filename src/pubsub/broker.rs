//! Redis broker client.
//!
//! Runs one multiplexed connection for PUBLISH commands and one pubsub
//! connection for SUBSCRIBE/UNSUBSCRIBE and the inbound message stream.
//! Commands arrive over an mpsc channel; received messages are forwarded to
//! the fanout hub. The client reconnects with exponential backoff and
//! exposes its connection state through the handle, so callers get
//! [`BrokerError::Disconnected`] immediately instead of queueing into a
//! dead transport.

use crate::pubsub::error::{BrokerError, BrokerResult};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Commands sent to the broker task.
pub(crate) enum BrokerCommand {
    Publish { channel: String, payload: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Shutdown,
}

/// Events emitted by the broker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A message arrived on a subscribed channel.
    Message {
        /// Channel the message was published on.
        channel: String,
        /// Message payload.
        payload: String,
    },
}

/// Cloneable handle for issuing broker commands.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
    connected: Arc<AtomicBool>,
}

impl BrokerHandle {
    /// Whether the broker transport is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// PUBLISH `payload` on `channel`.
    pub fn publish(&self, channel: &str, payload: &str) -> BrokerResult<()> {
        self.send(BrokerCommand::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        })
    }

    /// SUBSCRIBE to `channel`.
    pub fn subscribe(&self, channel: &str) -> BrokerResult<()> {
        self.send(BrokerCommand::Subscribe {
            channel: channel.to_string(),
        })
    }

    /// UNSUBSCRIBE from `channel`.
    pub fn unsubscribe(&self, channel: &str) -> BrokerResult<()> {
        self.send(BrokerCommand::Unsubscribe {
            channel: channel.to_string(),
        })
    }

    /// Ask the broker task to shut down cleanly.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BrokerCommand::Shutdown);
    }

    fn send(&self, command: BrokerCommand) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        self.tx
            .send(command)
            .map_err(|_| BrokerError::Transport("broker task stopped".to_string()))
    }
}

/// Build a handle wired to a bare command channel, bypassing the broker
/// task. Test support for the hub.
#[cfg(test)]
pub(crate) fn test_handle(
    connected: bool,
) -> (BrokerHandle, mpsc::UnboundedReceiver<BrokerCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = BrokerHandle {
        tx,
        connected: Arc::new(AtomicBool::new(connected)),
    };
    (handle, rx)
}

/// Spawn the broker client task.
///
/// Received messages are forwarded to `events`; the returned handle issues
/// commands.
pub fn spawn(
    url: String,
    events: mpsc::UnboundedSender<BrokerEvent>,
) -> (BrokerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let handle = BrokerHandle {
        tx,
        connected: connected.clone(),
    };
    let task = tokio::spawn(listener_task(url, events, rx, connected));
    (handle, task)
}

/// Reconnection delay schedule.
struct ExponentialBackoff {
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    const INITIAL: Duration = Duration::from_millis(500);

    fn new() -> Self {
        Self {
            current: Self::INITIAL,
            max: Duration::from_secs(30),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

/// Outer reconnection loop.
async fn listener_task(
    url: String,
    events: mpsc::UnboundedSender<BrokerEvent>,
    mut rx: mpsc::UnboundedReceiver<BrokerCommand>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = ExponentialBackoff::new();
    loop {
        match connect_and_run(&url, &events, &mut rx, &connected, &mut backoff).await {
            Ok(()) => {
                info!("broker client shut down");
                return;
            }
            Err(error) => {
                let delay = backoff.next_delay();
                warn!(%error, ?delay, "broker connection lost, reconnecting");
                if drain_during_backoff(&mut rx, delay).await {
                    return;
                }
            }
        }
    }
}

/// One connected session: serve commands and stream messages until the
/// transport drops or shutdown is requested.
async fn connect_and_run(
    url: &str,
    events: &mpsc::UnboundedSender<BrokerEvent>,
    rx: &mut mpsc::UnboundedReceiver<BrokerCommand>,
    connected: &AtomicBool,
    backoff: &mut ExponentialBackoff,
) -> Result<(), String> {
    let client = redis::Client::open(url).map_err(|e| format!("failed to open client: {e}"))?;

    let mut publish_conn = client
        .get_multiplexed_tokio_connection()
        .await
        .map_err(|e| format!("failed to get publish connection: {e}"))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| format!("failed to get pubsub connection: {e}"))?;

    connected.store(true, Ordering::Relaxed);
    backoff.reset();
    info!(url, "connected to broker");

    let result = loop {
        let mut messages = pubsub.on_message();
        tokio::select! {
            maybe = messages.next() => {
                drop(messages);
                match maybe {
                    Some(message) => {
                        let channel = message.get_channel_name().to_string();
                        match message.get_payload::<String>() {
                            Ok(payload) => {
                                let _ = events.send(BrokerEvent::Message { channel, payload });
                            }
                            Err(error) => {
                                warn!(%channel, %error, "dropping undecodable broker payload");
                            }
                        }
                    }
                    None => break Err("message stream ended".to_string()),
                }
            }
            command = rx.recv() => {
                drop(messages);
                match command {
                    None | Some(BrokerCommand::Shutdown) => break Ok(()),
                    Some(BrokerCommand::Publish { channel, payload }) => {
                        // A failed PUBLISH is transient; the channel stream
                        // decides whether the transport is really gone.
                        if let Err(error) = redis::cmd("PUBLISH")
                            .arg(&channel)
                            .arg(&payload)
                            .query_async::<()>(&mut publish_conn)
                            .await
                        {
                            warn!(%channel, %error, "PUBLISH failed");
                        }
                    }
                    Some(BrokerCommand::Subscribe { channel }) => {
                        if let Err(error) = pubsub.subscribe(&channel).await {
                            break Err(format!("SUBSCRIBE {channel} failed: {error}"));
                        }
                    }
                    Some(BrokerCommand::Unsubscribe { channel }) => {
                        if let Err(error) = pubsub.unsubscribe(&channel).await {
                            break Err(format!("UNSUBSCRIBE {channel} failed: {error}"));
                        }
                    }
                }
            }
        }
    };

    connected.store(false, Ordering::Relaxed);
    result
}

/// Sleep out a reconnect delay while refusing queued commands.
/// Returns `true` if shutdown was requested.
async fn drain_during_backoff(
    rx: &mut mpsc::UnboundedReceiver<BrokerCommand>,
    delay: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            command = rx.recv() => match command {
                None | Some(BrokerCommand::Shutdown) => return true,
                Some(BrokerCommand::Publish { channel, .. }) => {
                    warn!(%channel, "dropping PUBLISH while broker is disconnected");
                }
                Some(BrokerCommand::Subscribe { channel })
                | Some(BrokerCommand::Unsubscribe { channel }) => {
                    warn!(%channel, "dropping subscription change while broker is disconnected");
                }
            }
        }
    }
}
