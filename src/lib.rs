//! # Pubsub Relay
//!
//! A WebSocket server that bridges external pub/sub channels to connected
//! clients. Each client speaks RFC 6455 over a plain TCP socket; messages it
//! publishes are forwarded to a Redis broker, and messages arriving from the
//! broker are fanned out to every client subscribed to the channel they were
//! published on.
//!
//! ## Features
//!
//! - Hand-rolled RFC 6455 frame engine driven by exact read watermarks
//! - HTTP/1.1 upgrade handshake validation
//! - Message reassembly across continuation frames
//! - PING/PONG keep-alive with a 30 second cadence
//! - O(1) channel ↔ subscriber fanout over interned channel names
//!
//! ## Architecture
//!
//! The [`protocol`] module is sans-I/O: the [`protocol::WsEngine`] consumes
//! byte chunks sized by its own read watermark and queues outbound bytes,
//! while [`connection`] drives it against a socket. All subscription state
//! lives on a single fanout task in [`pubsub`], so registry and string-pool
//! mutation never crosses threads.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod server;
