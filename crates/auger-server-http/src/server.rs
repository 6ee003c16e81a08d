//! Relay HTTP server bootstrap
use auger_control::SessionRegistry;
use auger_proto::DEFAULT_WS_PATH;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::{build_router, RelayState};
use crate::{DEFAULT_REQUEST_TIMEOUT_SECS, MAX_BODY_SIZE};

#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub bind_addr: SocketAddr,
    /// Control endpoint path, always starting with `/`
    pub ws_path: String,
    pub request_timeout: Duration,
    pub max_body_size: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl HttpServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_ws_path(mut self, path: &str) -> Self {
        self.ws_path = normalize_ws_path(path);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Ensure the control path has a leading slash; empty falls back to `/ws`
pub fn normalize_ws_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        DEFAULT_WS_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

pub struct HttpServer {
    config: HttpServerConfig,
    registry: SessionRegistry,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, registry: SessionRegistry) -> Self {
        Self { config, registry }
    }

    /// Bind the listener without serving yet
    pub async fn bind(self) -> Result<BoundHttpServer, HttpServerError> {
        let local_addr = self.config.bind_addr;

        let listener = TcpListener::bind(local_addr).await.map_err(|e| {
            let port = local_addr.port();
            let address = local_addr.ip().to_string();
            let reason = e.to_string();
            HttpServerError::BindError {
                address,
                port,
                reason,
            }
        })?;
        let bound_addr = listener.local_addr()?;

        let state = RelayState::new(self.registry.clone())
            .with_request_timeout(self.config.request_timeout)
            .with_max_body_size(self.config.max_body_size);
        let app = build_router(state, &self.config.ws_path);

        info!("HTTP server listening on {}", bound_addr);
        info!("WebSocket path: {}", self.config.ws_path);
        info!("Base domain: {}", self.registry.config().base_domain);

        Ok(BoundHttpServer {
            listener,
            local_addr: bound_addr,
            app,
        })
    }

    /// Bind and serve until the process exits
    pub async fn start(self) -> Result<(), HttpServerError> {
        self.bind().await?.serve().await
    }
}

pub struct BoundHttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: Router,
}

impl BoundHttpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<(), HttpServerError> {
        axum::serve(self.listener, self.app).await?;
        Ok(())
    }

    /// Serve until `signal` resolves, then stop accepting connections
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), HttpServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}
