//! Per-connection driver.
//!
//! Owns the socket for one client: reads the HTTP upgrade request, runs the
//! handshake, then feeds the frame engine exact-watermark chunks until the
//! peer disconnects, idles out, or violates the protocol. Outbound frames
//! (engine output and hub fanout) funnel through one writer task so they
//! appear on the wire in submission order.

use crate::config::{LimitsConfig, ProtocolConfig};
use crate::protocol::engine::{InboundMessage, WsEngine};
use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::handshake::{self, HttpRequest, HttpResponse, Upgrade};
use crate::pubsub::envelope::ClientCommand;
use crate::pubsub::hub::HubHandle;
use crate::pubsub::registry::SubscriberId;
use crate::server::ServerStats;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serve one accepted socket to completion.
pub async fn run_connection(
    subscriber: SubscriberId,
    stream: TcpStream,
    peer: SocketAddr,
    protocol: ProtocolConfig,
    limits: LimitsConfig,
    hub: HubHandle,
    stats: Arc<ServerStats>,
) {
    stats.connection_opened();

    if let Err(error) = serve(subscriber, stream, peer, &protocol, &limits, &hub, &stats).await {
        debug!(subscriber, %peer, %error, "connection error");
    }

    // Teardown: drop the subscriptions first so fanout stops addressing
    // this connection, then let the writer drain and shut the socket down.
    hub.deregister(subscriber);
    stats.connection_closed();
    info!(subscriber, %peer, "connection closed");
}

async fn serve(
    subscriber: SubscriberId,
    mut stream: TcpStream,
    peer: SocketAddr,
    protocol: &ProtocolConfig,
    limits: &LimitsConfig,
    hub: &HubHandle,
    stats: &Arc<ServerStats>,
) -> ProtocolResult<()> {
    let mut engine = WsEngine::new(limits.max_payload_len);
    let mut read_buf = BytesMut::with_capacity(4096);

    // --- Upgrade phase ---
    let head = read_request_head(
        &mut stream,
        &mut read_buf,
        limits.max_handshake_size,
        protocol,
    )
    .await?;

    stats.upgrade_attempt();
    let request = match HttpRequest::parse(&head) {
        Ok(request) => request,
        Err(error) => {
            warn!(%peer, %error, "invalid upgrade request");
            stats.upgrade_failed();
            let mut response = HttpResponse::new(400);
            response.add_header("Connection", "Close");
            stream.write_all(&response.render()).await?;
            let _ = stream.shutdown().await;
            return Err(error);
        }
    };

    match handshake::accept_upgrade(&request) {
        Upgrade::Accepted(mut response) => {
            // Echo the client's cookie back on the 101.
            if let Some(cookie) = request.header("Cookie") {
                response.add_header("Cookie", cookie.to_string());
            }
            stream.write_all(&response.render()).await?;
            engine.complete_upgrade();
            stats.upgrade_success();
            info!(subscriber, %peer, target = %request.target, "websocket established");
        }
        Upgrade::Rejected(response) => {
            warn!(%peer, status = response.status(), "upgrade rejected");
            stats.upgrade_failed();
            stream.write_all(&response.render()).await?;
            let _ = stream.shutdown().await;
            return Err(ProtocolError::HandshakeRejected {
                status: response.status(),
            });
        }
    }

    // --- Frame phase ---
    let (mut reader, writer) = stream.into_split();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(write_frames(writer, frames_rx, stats.clone()));
    hub.register(subscriber, frames_tx.clone());

    drive_frames(
        subscriber,
        &mut engine,
        &mut reader,
        read_buf,
        &frames_tx,
        protocol,
        hub,
        stats,
    )
    .await
}

/// Accumulate bytes until the request head terminator arrives. Any bytes
/// past the terminator stay in `buf` for the frame phase.
async fn read_request_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    max: usize,
    protocol: &ProtocolConfig,
) -> ProtocolResult<Bytes> {
    loop {
        if let Some(pos) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            let head = buf.split_to(pos).freeze();
            buf.advance(4);
            return Ok(head);
        }
        if buf.len() > max {
            return Err(ProtocolError::RequestTooLarge { max });
        }
        let n = match tokio::time::timeout(protocol.idle_timeout, stream.read_buf(buf)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "handshake timed out",
                )))
            }
        };
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
    }
}

/// The watermark-gated read loop.
#[allow(clippy::too_many_arguments)]
async fn drive_frames(
    subscriber: SubscriberId,
    engine: &mut WsEngine,
    reader: &mut OwnedReadHalf,
    mut read_buf: BytesMut,
    frames_tx: &mpsc::UnboundedSender<Bytes>,
    protocol: &ProtocolConfig,
    hub: &HubHandle,
    stats: &Arc<ServerStats>,
) -> ProtocolResult<()> {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + protocol.ping_interval,
        protocol.ping_interval,
    );
    let mut last_read = tokio::time::Instant::now();

    loop {
        if engine.is_closed() {
            debug!(subscriber, "engine closed, tearing down");
            return Ok(());
        }
        let want = engine.watermark();

        // The engine only sees data once at least `want` bytes are buffered.
        while read_buf.len() < want {
            tokio::select! {
                result = reader.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!(subscriber, "peer disconnected");
                            return Ok(());
                        }
                        Ok(n) => {
                            last_read = tokio::time::Instant::now();
                            stats.bytes_received(n);
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                _ = ping.tick() => {
                    engine.keepalive_ping();
                    stats.ping_sent();
                    flush_engine(engine, frames_tx);
                }
                _ = tokio::time::sleep_until(last_read + protocol.idle_timeout) => {
                    info!(subscriber, "read idle timeout");
                    return Ok(());
                }
            }
        }

        let chunk = read_buf.split_to(want);
        if let Some(message) = engine.consume(&chunk) {
            stats.message_received();
            handle_message(subscriber, &message, hub);
        }
        flush_engine(engine, frames_tx);
    }
}

/// Hand the engine's queued output to the writer.
fn flush_engine(engine: &mut WsEngine, frames_tx: &mpsc::UnboundedSender<Bytes>) {
    if let Some(bytes) = engine.take_output() {
        let _ = frames_tx.send(bytes);
    }
}

/// Dispatch a reassembled application message.
fn handle_message(subscriber: SubscriberId, message: &InboundMessage, hub: &HubHandle) {
    if message.is_binary {
        warn!(subscriber, "dropping unexpected binary message");
        return;
    }
    match ClientCommand::parse(&message.payload) {
        Ok(ClientCommand::Sub { key }) => hub.subscribe(subscriber, key),
        Ok(ClientCommand::Unsub { key }) => hub.unsubscribe(subscriber, key),
        Ok(ClientCommand::Pub { key, data }) => hub.publish(key, data),
        Err(error) => warn!(subscriber, %error, "dropping invalid command payload"),
    }
}

/// Writer task: frames out in submission order, then a single socket
/// shutdown once every sender is gone.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    stats: Arc<ServerStats>,
) {
    while let Some(frame) = frames.recv().await {
        if writer.write_all(&frame).await.is_err() {
            break;
        }
        stats.message_sent(frame.len());
    }
    let _ = writer.shutdown().await;
}
