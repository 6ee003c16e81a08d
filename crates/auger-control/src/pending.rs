//! Pending requests
//!
//! A request forwarded to an agent is parked here until one of three things
//! happens: the owning agent answers, the deadline passes, or the agent's
//! session is torn down. The registry lock decides which one wins, so the
//! waiter observes exactly one outcome.

use auger_proto::HttpResponse;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::registry::SessionRegistry;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PendingError {
    #[error("Tunnel response timeout")]
    Timeout,

    #[error("Client disconnected")]
    ClientDisconnected,
}

pub(crate) type PendingOutcome = Result<HttpResponse, PendingError>;

/// Waiter side of a pending request.
///
/// Dropping it before [`PendingResponse::wait`] finishes removes the entry
/// from the registry, so abandoned public requests do not leak.
pub struct PendingResponse {
    registry: SessionRegistry,
    request_id: String,
    deadline: Instant,
    rx: oneshot::Receiver<PendingOutcome>,
    settled: bool,
}

impl PendingResponse {
    pub(crate) fn new(
        registry: SessionRegistry,
        request_id: String,
        deadline: Instant,
        rx: oneshot::Receiver<PendingOutcome>,
    ) -> Self {
        Self {
            registry,
            request_id,
            deadline,
            rx,
            settled: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the agent's response, the deadline, or session teardown
    pub async fn wait(mut self) -> Result<HttpResponse, PendingError> {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Either this expiry or a response that raced it lands in the channel.
                if self.registry.expire_pending(&self.request_id) {
                    debug!(request_id = %self.request_id, "Pending request timed out");
                }
                (&mut self.rx).await
            }
        };
        self.settled = true;

        outcome.unwrap_or(Err(PendingError::ClientDisconnected))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.cancel_pending(&self.request_id);
        }
    }
}
