//! Auger agent library
//!
//! Keeps one control connection per exposed local port and replays the
//! requests the relay forwards against the local service.

pub mod config;
pub mod connection;
pub mod http_proxy;
pub mod tunnel;

pub use config::{build_ws_url, parse_port_spec, ConfigError, TunnelSpec};
pub use connection::{ConnectionLifecycle, ConnectionState, ReconnectConfig, ReconnectDecision};
pub use http_proxy::{HttpProxy, ProxyError};
pub use tunnel::{AgentConfig, AgentEvent, TunnelAgent, TunnelError};
