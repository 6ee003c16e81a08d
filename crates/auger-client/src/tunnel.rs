//! Agent tunnel runner
//!
//! One [`TunnelAgent`] owns one control connection for one local port. It
//! sends `hello`, waits for `welcome`, then replays every `http_request` against
//! the local service on its own task so slow local requests never stall the
//! socket. Connection loss goes through [`ConnectionLifecycle`]; an `error`
//! message from the relay ends the agent for good.

use auger_proto::{decode, encode, Hello, HttpRequest, Message, Welcome};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionLifecycle, ReconnectConfig, ReconnectDecision};
use crate::http_proxy::{HttpProxy, DEFAULT_LOCAL_TIMEOUT};

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rejected by relay: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection lost after {0} consecutive failures")]
    RetriesExhausted(usize),
}

impl TunnelError {
    /// Errors a human has to fix before retrying makes sense
    pub fn is_non_recoverable(&self) -> bool {
        matches!(self, TunnelError::Rejected(_) | TunnelError::ConfigError(_))
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_non_recoverable()
    }
}

/// Per-tunnel agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control endpoint, e.g. `wss://relay.example.com/ws`
    pub ws_url: String,
    pub local_port: u16,
    pub token: Option<String>,
    pub subdomain: Option<String>,
    pub reconnect: ReconnectConfig,
    /// How long the local service gets per request
    pub local_timeout: Duration,
}

impl AgentConfig {
    pub fn new(ws_url: impl Into<String>, local_port: u16) -> Self {
        Self {
            ws_url: ws_url.into(),
            local_port,
            token: None,
            subdomain: None,
            reconnect: ReconnectConfig::default(),
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_subdomain(mut self, subdomain: Option<String>) -> Self {
        self.subdomain = subdomain;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = timeout;
        self
    }

    /// Log prefix: `sub:port` when a subdomain was requested, else `port`
    pub fn label(&self) -> String {
        match &self.subdomain {
            Some(subdomain) => format!("{}:{}", subdomain, self.local_port),
            None => self.local_port.to_string(),
        }
    }

    fn hello(&self) -> Hello {
        Hello::http(self.local_port)
            .with_token(self.token.clone())
            .with_requested_subdomain(self.subdomain.clone())
    }
}

/// Lifecycle notifications for embedders and tests
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Ready(Welcome),
    Rejected(String),
    Reconnecting { attempt: usize, delay: Duration },
}

/// How a single control connection ended
enum SessionEnd {
    Rejected(String),
    Lost(String),
}

pub struct TunnelAgent {
    config: AgentConfig,
    lifecycle: ConnectionLifecycle,
    proxy: HttpProxy,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl TunnelAgent {
    pub fn new(config: AgentConfig) -> Self {
        let proxy = HttpProxy::new(config.local_port).with_timeout(config.local_timeout);
        Self {
            lifecycle: ConnectionLifecycle::new(config.reconnect.clone()),
            config,
            proxy,
            events: None,
        }
    }

    /// Replay requests against another local address instead of `127.0.0.1:<port>`
    pub fn with_proxy(mut self, proxy: HttpProxy) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn label(&self) -> String {
        self.config.label()
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    /// Run until the relay rejects us or the reconnect budget is spent.
    ///
    /// Never returns `Ok` on its own; callers stop a healthy tunnel by
    /// dropping or aborting the future.
    pub async fn run(&mut self) -> Result<(), TunnelError> {
        let label = self.label();

        loop {
            if !self.lifecycle.begin_connect() {
                return Err(TunnelError::Rejected("tunnel is fatal".to_string()));
            }

            let reason = match self.run_session(&label).await {
                SessionEnd::Rejected(message) => {
                    self.emit(AgentEvent::Rejected(message.clone()));
                    return Err(TunnelError::Rejected(message));
                }
                SessionEnd::Lost(reason) => reason,
            };

            match self.lifecycle.on_connection_lost() {
                ReconnectDecision::Retry { attempt, delay } => {
                    match self.lifecycle.max_attempts() {
                        Some(max) => warn!(
                            "[{}] Connection lost ({}). Retrying ({}/{}) in {:?}...",
                            label, reason, attempt, max, delay
                        ),
                        None => warn!(
                            "[{}] Connection lost ({}). Retrying ({}) in {:?}...",
                            label, reason, attempt, delay
                        ),
                    }
                    self.emit(AgentEvent::Reconnecting { attempt, delay });
                    tokio::time::sleep(delay).await;
                }
                ReconnectDecision::GiveUp { attempts } => {
                    error!(
                        "[{}] Connection lost ({}). Retry limit reached, exiting.",
                        label, reason
                    );
                    return Err(TunnelError::RetriesExhausted(attempts));
                }
                // Each session reports its loss once, so losses coalesce here
                // by construction
                ReconnectDecision::AlreadyPending => {}
                ReconnectDecision::Fatal => {
                    return Err(TunnelError::Rejected(reason));
                }
            }
        }
    }

    async fn run_session(&mut self, label: &str) -> SessionEnd {
        debug!("[{}] Connecting to {}", label, self.config.ws_url);
        let ws_stream = match connect_async(self.config.ws_url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => return SessionEnd::Lost(e.to_string()),
        };

        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        // Single writer: hello, responses from request tasks, and the final close
        let writer: JoinHandle<()> = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, WsMessage::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!("Control socket write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let hello = Message::Hello(self.config.hello());
        if tx.send(WsMessage::Text(encode(&hello))).is_err() {
            return SessionEnd::Lost("writer stopped".to_string());
        }

        let end = loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                None => break SessionEnd::Lost("closed by relay".to_string()),
            };

            let message = match frame {
                WsMessage::Text(text) => decode(&text),
                WsMessage::Binary(data) => auger_proto::decode_bytes(&data),
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string());
                    break SessionEnd::Lost(reason);
                }
                // Pings are answered by tungstenite
                _ => continue,
            };

            match message {
                Ok(Message::Error(err)) => {
                    error!("[{}] Server error: {}", label, err.message);
                    self.lifecycle.on_server_error();
                    let _ = tx.send(WsMessage::Close(None));
                    break SessionEnd::Rejected(err.message);
                }
                Ok(Message::Welcome(welcome)) => {
                    self.lifecycle.on_welcome();
                    match &welcome.public_url {
                        Some(url) => info!("[{}] Tunnel ready: {}", label, url),
                        None => info!("[{}] Tunnel ready: {}", label, welcome.client_id),
                    }
                    self.emit(AgentEvent::Ready(welcome));
                }
                Ok(Message::HttpRequest(request)) => {
                    self.dispatch(label, request, tx.clone());
                }
                Ok(other) => {
                    debug!("[{}] Ignoring unexpected {} message", label, other.kind());
                }
                Err(e) => {
                    warn!("[{}] Ignoring malformed message: {}", label, e);
                }
            }
        };

        match &end {
            // The queued close is the writer's last frame
            SessionEnd::Rejected(_) => {
                let _ = writer.await;
            }
            // In-flight request tasks still hold senders; do not wait for them
            SessionEnd::Lost(_) => writer.abort(),
        }
        end
    }

    /// Hand a forwarded request to the local service without blocking the reader
    fn dispatch(&self, label: &str, request: HttpRequest, tx: mpsc::UnboundedSender<WsMessage>) {
        let proxy = self.proxy.clone();
        let label = label.to_string();

        tokio::spawn(async move {
            let method = request.method.clone();
            let path = request.path.clone();

            let response = proxy.execute(request).await;
            info!("[{}] {} {} -> {}", label, method, path, response.status);

            let text = encode(&Message::HttpResponse(response));
            if tx.send(WsMessage::Text(text)).is_err() {
                debug!("[{}] Control connection closed before response was sent", label);
            }
        });
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
