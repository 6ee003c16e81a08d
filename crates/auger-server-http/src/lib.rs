//! HTTP relay server
//!
//! Serves two surfaces on one port: the WebSocket control endpoint agents
//! connect to, and the public HTTP traffic that gets forwarded through them.

mod control;
pub mod router;
pub mod server;

pub use router::{build_router, extract_subdomain, RelayState, RouteError};
pub use server::{normalize_ws_path, BoundHttpServer, HttpServer, HttpServerConfig, HttpServerError};

/// Default deadline for an agent to answer a forwarded request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum public request body buffered for forwarding (16MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;
