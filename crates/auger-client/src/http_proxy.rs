//! HTTP Reverse Proxy for local server forwarding
//!
//! Replays `http_request` messages against the local service with hyper,
//! reusing HTTP/1.1 connections where possible. Every failure is folded into a
//! `502 Bad Gateway` response so the control connection never sees it.

use auger_proto::{Headers, HttpRequest, HttpResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Maximum number of pooled connections per target
const MAX_POOL_SIZE: usize = 10;

/// How long the local service gets to answer
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy errors
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("Local service did not respond within {0:?}")]
    Timeout(Duration),
}

/// HTTP Proxy with connection pooling
#[derive(Clone)]
pub struct HttpProxy {
    /// Local service address
    target: SocketAddr,
    pool: Arc<Mutex<Vec<http1::SendRequest<Full<Bytes>>>>>,
    timeout: Duration,
}

impl HttpProxy {
    /// Proxy for `127.0.0.1:<port>`
    pub fn new(port: u16) -> Self {
        Self::with_target(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    pub fn with_target(target: SocketAddr) -> Self {
        Self {
            target,
            pool: Arc::new(Mutex::new(Vec::with_capacity(MAX_POOL_SIZE))),
            timeout: DEFAULT_LOCAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward a request, answering 502 on any failure
    pub async fn execute(&self, request: HttpRequest) -> HttpResponse {
        let id = request.id.clone();
        match tokio::time::timeout(self.timeout, self.forward(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(request_id = %id, "Proxy error: {}", e);
                HttpResponse::bad_gateway(id)
            }
            Err(_) => {
                debug!(request_id = %id, "Proxy error: {}", ProxyError::Timeout(self.timeout));
                HttpResponse::bad_gateway(id)
            }
        }
    }

    /// Forward a request to the local service and collect the full response
    pub async fn forward(&self, request: HttpRequest) -> Result<HttpResponse, ProxyError> {
        let hyper_request = self.build_request(&request)?;

        let mut sender = self.get_connection().await?;
        let response = sender
            .send_request(hyper_request)
            .await
            .map_err(|e| ProxyError::RequestFailed(format!("Failed to send request: {}", e)))?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            // The relay re-frames the body
            if name == TRANSFER_ENCODING || name == CONTENT_LENGTH {
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProxyError::ResponseError(format!("Failed to read response body: {}", e)))?
            .to_bytes();

        // Only reuse the connection once the body has been fully read
        self.return_connection(sender).await;

        Ok(HttpResponse {
            id: request.id,
            status,
            headers,
            body: body.to_vec(),
        })
    }

    fn build_request(&self, request: &HttpRequest) -> Result<Request<Full<Bytes>>, ProxyError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(format!("Invalid method: {}", e)))?;

        let mut builder = Request::builder()
            .method(method)
            .uri(request.path.as_str())
            .header(HOST, self.target.to_string());

        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case(HOST.as_str())
                || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str())
                || name.eq_ignore_ascii_case(TRANSFER_ENCODING.as_str())
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        // An empty `Full` is already end-of-stream, so hyper writes no body
        // and no chunked framing for it
        let body = Full::new(Bytes::from(request.body.clone()));

        builder
            .body(body)
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to build request: {}", e)))
    }

    /// Get or create a connection to the target
    async fn get_connection(&self) -> Result<http1::SendRequest<Full<Bytes>>, ProxyError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some(mut sender) = pool.pop() {
                if sender.ready().await.is_ok() {
                    debug!("Reusing pooled connection to {}", self.target);
                    return Ok(sender);
                }
                debug!("Discarding stale connection from pool");
            }
        }

        debug!("Creating new connection to {}", self.target);
        let stream = TcpStream::connect(self.target).await.map_err(|e| {
            ProxyError::ConnectionFailed(format!("Failed to connect to {}: {}", self.target, e))
        })?;

        let io = TokioIo::new(stream);

        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| ProxyError::ConnectionFailed(format!("HTTP handshake failed: {}", e)))?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection closed: {}", e);
            }
        });

        Ok(sender)
    }

    async fn return_connection(&self, sender: http1::SendRequest<Full<Bytes>>) {
        if sender.is_closed() {
            return;
        }

        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOL_SIZE {
            pool.push(sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes as AxumBytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use tokio::net::TcpListener;

    async fn spawn_local_service() -> SocketAddr {
        let app = Router::new()
            .route("/status", get(|| async { "ok" }))
            .route(
                "/echo",
                post(|headers: HeaderMap, body: AxumBytes| async move {
                    let host = headers
                        .get("host")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let tag = headers
                        .get("x-tag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    (
                        StatusCode::CREATED,
                        [("x-host", host), ("x-tag", tag)],
                        body,
                    )
                }),
            )
            .route(
                "/framing",
                axum::routing::any(|headers: HeaderMap, body: AxumBytes| async move {
                    let has = |name: &str| headers.contains_key(name);
                    format!(
                        "content-length={} transfer-encoding={} body={}",
                        has("content-length"),
                        has("transfer-encoding"),
                        body.len()
                    )
                }),
            )
            .route(
                "/query",
                get(|uri: axum::http::Uri| async move { uri.query().unwrap_or_default().to_string() }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn request(method: &str, path: &str, body: &[u8]) -> HttpRequest {
        let mut headers = Headers::new();
        headers.insert("host".to_string(), "myapp.example.com".to_string());
        headers.insert("x-tag".to_string(), "blue".to_string());
        HttpRequest {
            id: "req_test".to_string(),
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_forward_get() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        let response = proxy.execute(request("GET", "/status", b"")).await;

        assert_eq!(response.id, "req_test");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
        assert!(!response.headers.contains_key("content-length"));
    }

    #[tokio::test]
    async fn test_forward_post_rewrites_host() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        let response = proxy.execute(request("POST", "/echo", b"payload")).await;

        assert_eq!(response.status, 201);
        assert_eq!(response.body, b"payload");
        assert_eq!(response.headers["x-host"], addr.to_string());
        assert_eq!(response.headers["x-tag"], "blue");
    }

    #[tokio::test]
    async fn test_forward_keeps_query_string() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        let response = proxy.execute(request("GET", "/query?a=1&b=2", b"")).await;
        assert_eq!(response.body, b"a=1&b=2");
    }

    #[tokio::test]
    async fn test_empty_body_is_not_sent() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        let response = proxy.execute(request("GET", "/framing", b"")).await;
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "content-length=false transfer-encoding=false body=0"
        );

        let response = proxy.execute(request("POST", "/framing", b"")).await;
        let framing = String::from_utf8(response.body).unwrap();
        assert!(framing.contains("transfer-encoding=false"), "{}", framing);
        assert!(framing.ends_with("body=0"), "{}", framing);
    }

    #[tokio::test]
    async fn test_pooled_connections_are_reused() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        for _ in 0..3 {
            let response = proxy.execute(request("GET", "/status", b"")).await;
            assert_eq!(response.status, 200);
        }
        assert_eq!(proxy.pool.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = HttpProxy::with_target(addr);
        let response = proxy.execute(request("GET", "/status", b"")).await;

        assert_eq!(response, HttpResponse::bad_gateway("req_test"));
    }

    #[tokio::test]
    async fn test_invalid_method_is_bad_gateway() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr);

        let response = proxy.execute(request("GE T", "/status", b"")).await;
        assert_eq!(response.status, 502);
        assert_eq!(response.body, b"Bad Gateway");
    }

    #[tokio::test]
    async fn test_slow_local_service_times_out() {
        let addr = spawn_local_service().await;
        let proxy = HttpProxy::with_target(addr).with_timeout(Duration::from_millis(100));

        let response = proxy.execute(request("GET", "/slow", b"")).await;
        assert_eq!(response.status, 502);
    }
}
