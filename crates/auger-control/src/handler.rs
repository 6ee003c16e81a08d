//! Control connection handler
//!
//! Transport-agnostic state machine for one agent connection. The WebSocket
//! task feeds it every inbound frame and obeys the returned [`HandlerAction`];
//! replies go out through the connection's [`SessionHandle`].

use auger_proto::{decode, decode_bytes, Hello, Message, ProtocolError};
use tracing::{debug, warn};

use crate::connection::SessionHandle;
use crate::registry::{Session, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Close,
}

pub struct ControlHandler {
    registry: SessionRegistry,
    handle: SessionHandle,
    session: Option<Session>,
}

impl ControlHandler {
    pub fn new(registry: SessionRegistry, handle: SessionHandle) -> Self {
        Self {
            registry,
            handle,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn handle_text(&mut self, text: &str) -> HandlerAction {
        self.dispatch(decode(text))
    }

    pub fn handle_binary(&mut self, data: &[u8]) -> HandlerAction {
        self.dispatch(decode_bytes(data))
    }

    /// Tear down the session, if any. Safe to call more than once.
    pub fn on_close(&mut self) {
        if let Some(session) = self.session.take() {
            self.registry.unregister(&session.id);
        }
    }

    fn dispatch(&mut self, decoded: Result<Message, ProtocolError>) -> HandlerAction {
        let session_id = self.session.as_ref().map(|s| s.id.clone());

        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    session_id = session_id.as_deref().unwrap_or("-"),
                    field = e.field(),
                    "Rejected control message: {}",
                    e
                );
                self.send_error(e.to_string());
                // A registered agent keeps its session; a half-open one is dropped.
                return match session_id {
                    Some(_) => HandlerAction::Continue,
                    None => HandlerAction::Close,
                };
            }
        };

        match (message, session_id) {
            (Message::Hello(hello), None) => self.register(hello),
            (Message::Hello(_), Some(id)) => {
                debug!(session_id = %id, "Ignoring repeated hello");
                HandlerAction::Continue
            }
            (_, None) => {
                self.send_error("Client not registered");
                HandlerAction::Close
            }
            (Message::HttpResponse(response), Some(id)) => {
                let request_id = response.id.clone();
                if !self.registry.complete_pending(&id, response) {
                    debug!(
                        session_id = %id,
                        request_id = %request_id,
                        "Discarding response with no waiting request"
                    );
                }
                HandlerAction::Continue
            }
            (other, Some(id)) => {
                warn!(session_id = %id, kind = other.kind(), "Unexpected message from agent");
                HandlerAction::Continue
            }
        }
    }

    fn register(&mut self, hello: Hello) -> HandlerAction {
        match self.registry.register(&hello, self.handle.clone()) {
            Ok(session) => {
                let welcome = self.registry.welcome(&session);
                self.session = Some(session);
                if self.handle.send(Message::Welcome(welcome)).is_err() {
                    return HandlerAction::Close;
                }
                HandlerAction::Continue
            }
            Err(e) => {
                warn!(local_port = hello.local_port, "Registration rejected: {}", e);
                self.send_error(e.to_string());
                HandlerAction::Close
            }
        }
    }

    fn send_error(&self, message: impl Into<String>) {
        let _ = self.handle.send(Message::error(message));
    }
}

impl Drop for ControlHandler {
    fn drop(&mut self) {
        self.on_close();
    }
}
