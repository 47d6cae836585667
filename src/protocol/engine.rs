//! The per-connection WebSocket engine.
//!
//! The engine is a watermark-driven state machine: [`WsEngine::watermark`]
//! reports exactly how many buffered bytes it needs next, and
//! [`WsEngine::consume`] must be called with exactly that many. Outbound
//! bytes (PONG replies, keep-alive PINGs) accumulate in an internal queue
//! drained with [`WsEngine::take_output`].
//!
//! Protocol violations never raise errors. The engine moves to
//! [`State::Closed`] and the connection driver tears the socket down
//! without sending a CLOSE frame.

use crate::protocol::frame::{self, FrameStart, Opcode, PAYLOAD_LEN_16, PAYLOAD_LEN_64};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Connection-level engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the HTTP upgrade handshake to complete.
    NeedsHttpUpgrade,
    /// Waiting for the two initial header bytes of the next frame.
    NeedsInitial,
    /// Waiting for a 16 bit extended payload length.
    NeedsLength16,
    /// Waiting for a 64 bit extended payload length.
    NeedsLength64,
    /// Waiting for the 4 byte masking key.
    NeedsMaskingKey,
    /// Waiting for the frame payload.
    NeedsPayload,
    /// The connection has failed or the peer sent CLOSE.
    Closed,
}

/// A fully reassembled application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message payload, concatenated across continuation frames.
    pub payload: Bytes,
    /// Whether the message was carried in BINARY frames.
    pub is_binary: bool,
}

/// The WebSocket engine for one connection.
pub struct WsEngine {
    state: State,

    // Current frame metadata.
    frame_fin: bool,
    frame_opcode: u8,
    frame_len: u64,
    /// Masking key in the byte order it arrived in.
    mask_key: [u8; 4],

    // Current message context.
    message_is_binary: bool,
    message_continuing: bool,

    /// Unmasked payload of the current frame.
    frame_buf: BytesMut,
    /// Message accumulated across continuation frames.
    message_buf: BytesMut,
    /// Queued outbound bytes.
    out: BytesMut,

    /// Keep-alive PING counter.
    ping_count: u32,
    max_payload_len: u64,
}

impl WsEngine {
    /// Create an engine in the pre-upgrade state.
    pub fn new(max_payload_len: u64) -> Self {
        Self {
            state: State::NeedsHttpUpgrade,
            frame_fin: false,
            frame_opcode: 0,
            frame_len: 0,
            mask_key: [0; 4],
            message_is_binary: false,
            message_continuing: false,
            frame_buf: BytesMut::new(),
            message_buf: BytesMut::new(),
            out: BytesMut::new(),
            ping_count: 0,
            max_payload_len,
        }
    }

    /// Current engine state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the connection should be torn down.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// How many buffered bytes [`consume`](Self::consume) needs next.
    pub fn watermark(&self) -> usize {
        match self.state {
            State::NeedsInitial | State::NeedsLength16 => 2,
            State::NeedsLength64 => 8,
            State::NeedsMaskingKey => 4,
            State::NeedsPayload => self.frame_len as usize,
            State::NeedsHttpUpgrade | State::Closed => 0,
        }
    }

    /// Switch from the upgrade state to frame parsing. Called after the
    /// handshake response has been queued for the client.
    pub fn complete_upgrade(&mut self) {
        debug_assert_eq!(self.state, State::NeedsHttpUpgrade);
        self.state = State::NeedsInitial;
    }

    /// Drain the queued outbound bytes, if any.
    pub fn take_output(&mut self) -> Option<Bytes> {
        if self.out.is_empty() {
            None
        } else {
            Some(self.out.split().freeze())
        }
    }

    /// Feed exactly [`watermark`](Self::watermark) bytes to the engine.
    /// Returns a message when the chunk completed one.
    pub fn consume(&mut self, chunk: &[u8]) -> Option<InboundMessage> {
        debug_assert_eq!(chunk.len(), self.watermark());
        match self.state {
            State::NeedsInitial => {
                self.consume_initial([chunk[0], chunk[1]]);
                None
            }
            State::NeedsLength16 => {
                self.consume_length(u16::from_be_bytes([chunk[0], chunk[1]]) as u64);
                None
            }
            State::NeedsLength64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                self.consume_length(u64::from_be_bytes(bytes));
                None
            }
            State::NeedsMaskingKey => {
                self.mask_key.copy_from_slice(chunk);
                self.state = State::NeedsPayload;
                None
            }
            State::NeedsPayload => self.consume_payload(chunk),
            // Bytes arriving before the upgrade or after close are dropped.
            State::NeedsHttpUpgrade | State::Closed => None,
        }
    }

    fn consume_initial(&mut self, bytes: [u8; 2]) {
        let start = FrameStart::parse(bytes);
        self.frame_fin = start.fin;
        self.frame_opcode = start.opcode;
        self.frame_len = start.len7 as u64;

        // RSV1-3 must be zero unless an extension was negotiated; none are.
        if start.reserved != 0 {
            warn!(reserved = start.reserved, "nonzero reserved bits");
            self.state = State::Closed;
            return;
        }
        // All frames sent from client to server must be masked.
        if !start.masked {
            warn!("unmasked client frame");
            self.state = State::Closed;
            return;
        }

        self.state = match start.len7 {
            PAYLOAD_LEN_16 => State::NeedsLength16,
            PAYLOAD_LEN_64 => State::NeedsLength64,
            _ => State::NeedsMaskingKey,
        };

        // A CLOSE with an empty payload has nothing left to read.
        if start.opcode == Opcode::Close as u8 && start.len7 == 0 {
            debug!("CLOSE frame received");
            self.state = State::Closed;
        }
    }

    fn consume_length(&mut self, len: u64) {
        self.frame_len = len;
        if len > self.max_payload_len {
            warn!(len, max = self.max_payload_len, "payload exceeds limit");
            self.state = State::Closed;
            return;
        }
        self.state = State::NeedsMaskingKey;
    }

    fn consume_payload(&mut self, chunk: &[u8]) -> Option<InboundMessage> {
        self.frame_buf.clear();
        self.frame_buf.extend_from_slice(chunk);
        frame::apply_mask(self.mask_key, &mut self.frame_buf);

        let opcode = match Opcode::from_u8(self.frame_opcode) {
            Some(opcode) => opcode,
            None => {
                warn!(opcode = self.frame_opcode, "unknown opcode");
                self.state = State::Closed;
                return None;
            }
        };

        match opcode {
            Opcode::Continuation => {
                if !self.message_continuing {
                    warn!("unexpected continuation frame");
                    self.state = State::Closed;
                    return None;
                }
                self.message_buf.extend_from_slice(&self.frame_buf);
                self.state = State::NeedsInitial;
                if self.frame_fin {
                    self.message_continuing = false;
                    return Some(self.finish_message());
                }
                None
            }
            Opcode::Text | Opcode::Binary => {
                if self.message_continuing {
                    warn!("data frame while a fragmented message is in progress");
                    self.state = State::Closed;
                    return None;
                }
                self.message_is_binary = opcode == Opcode::Binary;
                self.message_buf.extend_from_slice(&self.frame_buf);
                self.state = State::NeedsInitial;
                if self.frame_fin {
                    return Some(self.finish_message());
                }
                self.message_continuing = true;
                None
            }
            Opcode::Close => {
                debug!("CLOSE frame received");
                self.state = State::Closed;
                None
            }
            Opcode::Ping => {
                // "A Pong frame sent in response to a Ping frame must have
                // identical application data."
                frame::encode_frame(Opcode::Pong, &self.frame_buf, &mut self.out);
                self.state = State::NeedsInitial;
                None
            }
            Opcode::Pong => {
                self.state = State::NeedsInitial;
                None
            }
        }
    }

    fn finish_message(&mut self) -> InboundMessage {
        InboundMessage {
            payload: self.message_buf.split().freeze(),
            is_binary: self.message_is_binary,
        }
    }

    /// Queue a keep-alive PING whose payload is the decimal counter value.
    /// Does nothing before the upgrade completes or after close.
    pub fn keepalive_ping(&mut self) {
        if matches!(self.state, State::NeedsHttpUpgrade | State::Closed) {
            return;
        }
        let payload = self.ping_count.to_string();
        self.ping_count = self.ping_count.wrapping_add(1);
        frame::encode_frame(Opcode::Ping, payload.as_bytes(), &mut self.out);
    }
}
