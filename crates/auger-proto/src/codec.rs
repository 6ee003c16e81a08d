//! JSON codec for control-channel messages
//!
//! Encoding is plain serde. Decoding walks the JSON object by hand so that a
//! rejected message names the exact field that violated its shape.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::{
    ErrorMessage, Headers, Hello, HttpRequest, HttpResponse, Message, TunnelType, Welcome,
};

/// Errors produced while decoding a control-channel frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid field `{field}`: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Unsupported tunnel type: {0}")]
    UnsupportedTunnelType(String),
}

impl ProtocolError {
    /// Name of the field that failed validation (`"$"` for the whole frame)
    pub fn field(&self) -> &str {
        match self {
            ProtocolError::Malformed(_) => "$",
            ProtocolError::InvalidField { field, .. } => field,
            ProtocolError::UnknownType(_) => "type",
            ProtocolError::UnsupportedTunnelType(_) => "tunnelType",
        }
    }
}

/// Encode a message as a JSON text frame
pub fn encode(message: &Message) -> String {
    // Every field is a string, integer or string map, so serialization cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}

/// Decode a binary frame. The payload must be UTF-8 JSON.
pub fn decode_bytes(data: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| ProtocolError::Malformed(format!("frame is not UTF-8: {}", e)))?;
    decode(text)
}

/// Decode and validate a JSON text frame
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".to_string()))?;

    let kind = required_str(obj, "type")?;

    match kind.as_str() {
        "hello" => decode_hello(obj).map(Message::Hello),
        "welcome" => decode_welcome(obj).map(Message::Welcome),
        "error" => Ok(Message::Error(ErrorMessage {
            message: required_str(obj, "message")?,
        })),
        "http_request" => decode_http_request(obj).map(Message::HttpRequest),
        "http_response" => decode_http_response(obj).map(Message::HttpResponse),
        _ => Err(ProtocolError::UnknownType(kind)),
    }
}

/// Base64-encode a body (standard alphabet, padded)
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode a base64 body. The empty string decodes to an empty body.
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(encoded)
        .map_err(|_| ProtocolError::InvalidField {
            field: "bodyBase64",
            expected: "base64 string",
        })
}

fn decode_hello(obj: &Map<String, Value>) -> Result<Hello, ProtocolError> {
    let tunnel_type = match required_str(obj, "tunnelType")?.as_str() {
        "http" => TunnelType::Http,
        other => return Err(ProtocolError::UnsupportedTunnelType(other.to_string())),
    };

    let local_port = obj
        .get("localPort")
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or(ProtocolError::InvalidField {
            field: "localPort",
            expected: "integer port number",
        })?;

    Ok(Hello {
        tunnel_type,
        local_port,
        token: optional_str(obj, "token")?,
        requested_subdomain: optional_str(obj, "requestedSubdomain")?,
    })
}

fn decode_welcome(obj: &Map<String, Value>) -> Result<Welcome, ProtocolError> {
    let heartbeat_seconds =
        obj.get("heartbeatSeconds")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::InvalidField {
                field: "heartbeatSeconds",
                expected: "non-negative integer",
            })?;

    Ok(Welcome {
        client_id: required_str(obj, "clientId")?,
        subdomain: optional_str(obj, "subdomain")?,
        public_url: optional_str(obj, "publicUrl")?,
        base_domain: required_str(obj, "baseDomain")?,
        heartbeat_seconds,
    })
}

fn decode_http_request(obj: &Map<String, Value>) -> Result<HttpRequest, ProtocolError> {
    Ok(HttpRequest {
        id: required_str(obj, "id")?,
        method: required_str(obj, "method")?,
        path: required_str(obj, "path")?,
        headers: required_headers(obj)?,
        body: decode_body(&required_str(obj, "bodyBase64")?)?,
    })
}

fn decode_http_response(obj: &Map<String, Value>) -> Result<HttpResponse, ProtocolError> {
    let status = obj
        .get("status")
        .and_then(Value::as_u64)
        .filter(|status| (100..=999).contains(status))
        .ok_or(ProtocolError::InvalidField {
            field: "status",
            expected: "HTTP status code",
        })? as u16;

    Ok(HttpResponse {
        id: required_str(obj, "id")?,
        status,
        headers: required_headers(obj)?,
        body: decode_body(&required_str(obj, "bodyBase64")?)?,
    })
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, ProtocolError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ProtocolError::InvalidField {
            field,
            expected: "string",
        })
}

/// Absent and `null` both mean "not provided"
fn optional_str(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ProtocolError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::InvalidField {
            field,
            expected: "string",
        }),
    }
}

fn required_headers(obj: &Map<String, Value>) -> Result<Headers, ProtocolError> {
    let invalid = ProtocolError::InvalidField {
        field: "headers",
        expected: "object of string values",
    };

    let map = obj
        .get("headers")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid.clone())?;

    map.iter()
        .map(|(name, value)| {
            value
                .as_str()
                .map(|v| (name.clone(), v.to_string()))
                .ok_or_else(|| invalid.clone())
        })
        .collect()
}
