//! # WebSocket protocol engine
//!
//! This module implements the server side of RFC 6455 as a sans-I/O state
//! machine. The [`WsEngine`] asks for an exact number of buffered bytes (its
//! read watermark), consumes them, and queues any bytes it wants written.
//! The caller owns the socket and the timers.
//!
//! - [`handshake`] validates the HTTP upgrade request and builds the 101
//!   response with the `Sec-WebSocket-Accept` token.
//! - [`frame`] decodes and encodes the frame header layer, including
//!   client-side masking.
//! - [`engine`] tracks connection state, reassembles fragmented messages,
//!   and services PING/PONG/CLOSE.

pub mod engine;
pub mod error;
pub mod frame;
pub mod handshake;

pub use engine::{InboundMessage, State, WsEngine};
pub use error::ProtocolError;
pub use frame::Opcode;
pub use handshake::{accept_upgrade, HttpRequest, HttpResponse, Upgrade};
