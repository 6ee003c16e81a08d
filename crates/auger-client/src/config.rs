//! Agent-side configuration helpers

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid port spec \"{spec}\": {reason}")]
    InvalidPortSpec { spec: String, reason: &'static str },

    #[error("Invalid server URL \"{url}\": {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

/// One local port to expose, optionally with a requested subdomain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub port: u16,
    pub subdomain: Option<String>,
}

impl TunnelSpec {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            subdomain: None,
        }
    }

    /// Log prefix: `sub:port` when a subdomain was requested, else `port`
    pub fn label(&self) -> String {
        match &self.subdomain {
            Some(subdomain) => format!("{}:{}", subdomain, self.port),
            None => self.port.to_string(),
        }
    }
}

/// Parse `<port>` or `<port>:<subdomain>`
pub fn parse_port_spec(spec: &str) -> Result<TunnelSpec, ConfigError> {
    let invalid = |reason| ConfigError::InvalidPortSpec {
        spec: spec.to_string(),
        reason,
    };

    let mut parts = spec.split(':');
    let port_part = parts.next().unwrap_or_default().trim();
    let subdomain_part = parts.next();
    if parts.next().is_some() {
        return Err(invalid("expected <port> or <port>:<subdomain>"));
    }

    if port_part.is_empty() {
        return Err(invalid("missing port"));
    }
    let port: u16 = port_part
        .parse()
        .map_err(|_| invalid("port must be a number between 1 and 65535"))?;
    if port == 0 {
        return Err(invalid("port must be a number between 1 and 65535"));
    }

    let subdomain = match subdomain_part.map(str::trim) {
        None => None,
        Some("") => return Err(invalid("subdomain cannot be empty")),
        Some(subdomain) => Some(subdomain.to_string()),
    };

    Ok(TunnelSpec { port, subdomain })
}

/// Resolve the control WebSocket URL from the server URL and path.
///
/// `http` becomes `ws` and `https` becomes `wss`; the path replaces any path
/// on the server URL.
pub fn build_ws_url(server_url: &str, ws_path: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidServerUrl {
        url: server_url.to_string(),
        reason,
    };

    let base = Url::parse(server_url.trim()).map_err(|e| invalid(e.to_string()))?;
    let mut ws_url = base.join(ws_path).map_err(|e| invalid(e.to_string()))?;

    let scheme = match ws_url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        "ws" | "wss" => None,
        other => return Err(invalid(format!("unsupported scheme \"{}\"", other))),
    };
    if let Some(scheme) = scheme {
        ws_url
            .set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch to {}", scheme)))?;
    }

    Ok(ws_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_only() {
        assert_eq!(parse_port_spec("3000").unwrap(), TunnelSpec::new(3000));
    }

    #[test]
    fn test_parse_port_with_subdomain() {
        let spec = parse_port_spec("3000:test").unwrap();
        assert_eq!(spec.port, 3000);
        assert_eq!(spec.subdomain.as_deref(), Some("test"));
        assert_eq!(spec.label(), "test:3000");
    }

    #[test]
    fn test_parse_port_spec_rejections() {
        for bad in [":test", "3000:", "port:test", "0:test", "3000:test:extra", "70000", ""] {
            assert!(parse_port_spec(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_label_without_subdomain() {
        assert_eq!(TunnelSpec::new(8080).label(), "8080");
    }

    #[test]
    fn test_build_ws_url() {
        assert_eq!(
            build_ws_url("http://localhost:8080", "/ws").unwrap(),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            build_ws_url("https://auger.example.com", "/ws").unwrap(),
            "wss://auger.example.com/ws"
        );
        assert_eq!(
            build_ws_url("https://auger.example.com/ignored", "/tunnel").unwrap(),
            "wss://auger.example.com/tunnel"
        );
        assert_eq!(
            build_ws_url("ws://127.0.0.1:9000", "/ws").unwrap(),
            "ws://127.0.0.1:9000/ws"
        );
    }

    #[test]
    fn test_build_ws_url_rejects_garbage() {
        assert!(build_ws_url("not a url", "/ws").is_err());
        assert!(build_ws_url("ftp://example.com", "/ws").is_err());
    }
}
