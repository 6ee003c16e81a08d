//! Public request routing
//!
//! Maps `Host` headers to agent sessions and turns public HTTP requests into
//! `http_request` messages, then waits for the matching `http_response`.

use auger_control::{PendingError, SessionRegistry};
use auger_proto::{Headers, HttpRequest, HttpResponse, Message, TunnelType};
use axum::body::{to_bytes, Body};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use http_body_util::LengthLimitError;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::control::serve_control;
use crate::{DEFAULT_REQUEST_TIMEOUT_SECS, MAX_BODY_SIZE};

/// Routing failures, rendered as plain-text responses
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Not Found")]
    NoTunnel,

    #[error("Tunnel not found")]
    TunnelNotFound { subdomain: String },

    #[error("Tunnel unavailable")]
    TunnelUnavailable,

    #[error("Gateway Timeout")]
    Gateway(#[from] PendingError),

    #[error("Payload Too Large")]
    BodyTooLarge,

    #[error("Bad Request")]
    BadRequest(String),
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::NoTunnel | RouteError::TunnelNotFound { .. } => StatusCode::NOT_FOUND,
            RouteError::TunnelUnavailable => StatusCode::BAD_GATEWAY,
            RouteError::Gateway(_) => StatusCode::GATEWAY_TIMEOUT,
            RouteError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RouteError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Shared state for the relay's axum app
#[derive(Clone)]
pub struct RelayState {
    registry: SessionRegistry,
    request_timeout: Duration,
    max_body_size: usize,
}

impl RelayState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_body_size: MAX_BODY_SIZE,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Build the relay app: the control endpoint at `ws_path`, everything else forwarded
pub fn build_router(state: RelayState, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, any(control_or_forward))
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Extract the tunnel subdomain from a `Host` value.
///
/// The port is ignored and matching is case-insensitive. The bare base domain
/// and hosts outside it yield `None`.
pub fn extract_subdomain(host: &str, base_domain: &str) -> Option<String> {
    let hostname = host.split(':').next().unwrap_or_default().to_ascii_lowercase();
    let base = base_domain.to_ascii_lowercase();

    if hostname.is_empty() || hostname == base {
        return None;
    }

    let subdomain = hostname.strip_suffix(base.as_str())?.strip_suffix('.')?;
    if subdomain.is_empty() {
        return None;
    }
    Some(subdomain.to_string())
}

async fn control_or_forward(
    State(state): State<RelayState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    match ws {
        Ok(upgrade) => {
            let registry = state.registry.clone();
            let heartbeat = Duration::from_secs(registry.config().heartbeat_seconds.max(1));
            upgrade.on_upgrade(move |socket| serve_control(socket, registry, heartbeat))
        }
        // Plain HTTP on the control path is ordinary public traffic
        Err(_) => forward(State(state), request).await,
    }
}

async fn forward(State(state): State<RelayState>, request: Request) -> Response {
    match forward_request(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(status = %e.status(), "Public request not forwarded: {}", e);
            e.into_response()
        }
    }
}

async fn forward_request(state: &RelayState, request: Request) -> Result<Response, RouteError> {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_string();

    let base_domain = &state.registry.config().base_domain;
    let Some(subdomain) = extract_subdomain(&host, base_domain) else {
        if request.uri().path() == "/" {
            return Ok((StatusCode::OK, "Auger server running").into_response());
        }
        return Err(RouteError::NoTunnel);
    };

    let session = state
        .registry
        .resolve_by_subdomain(&subdomain)
        .ok_or_else(|| RouteError::TunnelNotFound {
            subdomain: subdomain.clone(),
        })?;

    match session.tunnel_type {
        TunnelType::Http if !session.handle.is_closed() => {}
        _ => return Err(RouteError::TunnelUnavailable),
    }

    let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    let method = request.method().to_string();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = collect_headers(request.headers());

    let body = to_bytes(request.into_body(), state.max_body_size)
        .await
        .map_err(|e| {
            let inner = e.into_inner();
            if inner.downcast_ref::<LengthLimitError>().is_some() {
                RouteError::BodyTooLarge
            } else {
                RouteError::BadRequest(inner.to_string())
            }
        })?;

    let deadline = Instant::now() + state.request_timeout;
    let pending = state
        .registry
        .create_pending(&session.id, &request_id, deadline)?;

    debug!(
        session_id = %session.id,
        request_id = %request_id,
        "Forwarding {} {} to {}",
        method,
        path,
        subdomain
    );

    let message = Message::HttpRequest(HttpRequest {
        id: request_id.clone(),
        method,
        path,
        headers,
        body: body.to_vec(),
    });
    if session.handle.send(message).is_err() {
        return Err(RouteError::TunnelUnavailable);
    }

    let response = pending.wait().await.map_err(|e| {
        warn!(session_id = %session.id, request_id = %request_id, "{}", e);
        RouteError::Gateway(e)
    })?;

    build_response(response)
}

/// Join repeated headers with ", " so the map carries one value per name
fn collect_headers(headers: &axum::http::HeaderMap) -> Headers {
    let mut collected = Headers::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

fn build_response(response: HttpResponse) -> Result<Response, RouteError> {
    let status = StatusCode::from_u16(response.status).map_err(|_| {
        warn!(request_id = %response.id, status = response.status, "Agent sent invalid status");
        RouteError::TunnelUnavailable
    })?;

    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        // The body is re-framed by the relay
        if name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str())
            || name.eq_ignore_ascii_case(TRANSFER_ENCODING.as_str())
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => debug!(request_id = %response.id, header = %name, "Dropping invalid header"),
        }
    }

    builder
        .body(Body::from(response.body))
        .map_err(|e| RouteError::BadRequest(e.to_string()))
}
