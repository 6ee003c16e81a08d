//! Control plane for the relay
//!
//! Owns every piece of relay state that outlives a single HTTP request:
//! registered agent sessions, the subdomain index, and requests that are
//! waiting for an agent to answer.
pub mod audit;
pub mod connection;
pub mod handler;
pub mod pending;
pub mod registry;
pub mod subdomain;

pub use audit::{DatabaseAudit, NoopAudit, SessionAudit, SessionRecord};
pub use connection::{ConnectionClosed, Outbound, SessionHandle};
pub use handler::{ControlHandler, HandlerAction};
pub use pending::{PendingError, PendingResponse};
pub use registry::{RegistryConfig, RegistryError, Session, SessionRegistry};
pub use subdomain::{
    validate_subdomain, RandomSource, SubdomainAllocator, SubdomainError, ThreadRngSource,
};
