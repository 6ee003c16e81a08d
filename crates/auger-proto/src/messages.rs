//! Protocol message types

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Header map carried by forwarded requests and responses.
///
/// Multi-valued headers are joined with `", "` by the relay before they are
/// placed here.
pub type Headers = BTreeMap<String, String>;

/// Kind of tunnel an agent asks for. Only HTTP exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Http,
}

impl TunnelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelType::Http => "http",
        }
    }
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main control-channel message enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// agent -> relay, first frame on every connection
    Hello(Hello),
    /// relay -> agent, registration accepted
    Welcome(Welcome),
    /// relay -> agent, registration rejected or protocol violation
    Error(ErrorMessage),
    /// relay -> agent, a public request to replay locally
    HttpRequest(HttpRequest),
    /// agent -> relay, the local service's answer
    HttpResponse(HttpResponse),
}

impl Message {
    /// Wire name of this message (`"hello"`, `"http_request"`, ...)
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Welcome(_) => "welcome",
            Message::Error(_) => "error",
            Message::HttpRequest(_) => "http_request",
            Message::HttpResponse(_) => "http_response",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub tunnel_type: TunnelType,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_subdomain: Option<String>,
}

impl Hello {
    pub fn http(local_port: u16) -> Self {
        Self {
            tunnel_type: TunnelType::Http,
            local_port,
            token: None,
            requested_subdomain: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_requested_subdomain(mut self, subdomain: Option<String>) -> Self {
        self.requested_subdomain = subdomain;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub base_domain: String,
    pub heartbeat_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRequest {
    pub id: String,
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub headers: Headers,
    #[serde(rename = "bodyBase64", serialize_with = "serialize_body")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub id: String,
    pub status: u16,
    pub headers: Headers,
    #[serde(rename = "bodyBase64", serialize_with = "serialize_body")]
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Fallback answer when the local service cannot be reached
    pub fn bad_gateway(id: impl Into<String>) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Self {
            id: id.into(),
            status: 502,
            headers,
            body: b"Bad Gateway".to_vec(),
        }
    }
}

fn serialize_body<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&crate::codec::encode_body(body))
}
