//! Outbound side of an agent control connection
//!
//! The WebSocket task owns the socket; everything else talks to it through a
//! [`SessionHandle`], an unbounded queue drained by that task's writer loop.

use auger_proto::Message;
use thiserror::Error;
use tokio::sync::mpsc;

/// Work item for a connection's writer loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(Message),
    /// Flush queued frames, then close the socket
    Close,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Control connection closed")]
pub struct ConnectionClosed;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    /// Create a handle together with the receiver the writer loop drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Message) -> Result<(), ConnectionClosed> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| ConnectionClosed)
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
