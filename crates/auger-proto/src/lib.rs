//! Auger Protocol Definitions
//!
//! This crate defines the control-channel vocabulary shared by the relay and the
//! agent: five JSON message kinds exchanged as WebSocket text frames, plus the
//! codec that validates their shape.

pub mod codec;
pub mod messages;

pub use codec::{decode, decode_bytes, encode, ProtocolError};
pub use messages::*;

/// Heartbeat interval advertised in `welcome` (seconds)
pub const DEFAULT_HEARTBEAT_SECONDS: u64 = 30;

/// Default WebSocket path for the control channel
pub const DEFAULT_WS_PATH: &str = "/ws";
