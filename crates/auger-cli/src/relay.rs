//! `auger relay`: the public relay server

use anyhow::{bail, Context, Result};
use auger_control::{DatabaseAudit, RegistryConfig, SessionRegistry, SubdomainAllocator};
use auger_server_http::{HttpServer, HttpServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Relay settings after flag/env resolution
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub base_domain: String,
    pub bind_ip: IpAddr,
    pub http_port: u16,
    pub ws_path: String,
    pub tokens: Vec<String>,
    pub db_path: String,
    pub public_scheme: String,
}

impl RelaySettings {
    /// Trim and lower-case the domain and drop blank tokens
    pub fn normalized(mut self) -> Result<Self> {
        self.base_domain = self.base_domain.trim().to_ascii_lowercase();
        if self.base_domain.is_empty() {
            bail!("AUGER_BASE_DOMAIN is required");
        }
        self.tokens = self
            .tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.db_path = self.db_path.trim().to_string();
        Ok(self)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.base_domain.clone())
            .with_tokens(self.tokens.clone())
            .with_public_scheme(self.public_scheme.clone())
    }
}

/// Create the parent directory of a file-backed SQLite database
pub fn ensure_db_dir(db_path: &str) -> Result<()> {
    if db_path == ":memory:" || db_path.contains("://") {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create data directory: {:?}", parent))?;
        }
    }
    Ok(())
}

pub async fn run_relay(settings: RelaySettings) -> Result<()> {
    let settings = settings.normalized()?;

    ensure_db_dir(&settings.db_path)?;
    let db_url = auger_relay_db::database_url(&settings.db_path);
    info!("Connecting to database: {}", db_url);
    let db = auger_relay_db::connect(&db_url)
        .await
        .context("Failed to connect to database")?;
    auger_relay_db::migrate(&db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run database migrations: {}", e))?;

    let audit = DatabaseAudit::spawn(db);
    let registry = SessionRegistry::with_parts(
        settings.registry_config(),
        SubdomainAllocator::new(),
        Arc::new(audit.clone()),
    );

    if settings.tokens.is_empty() {
        warn!("No AUGER_TOKENS configured; any agent can connect");
    } else {
        info!("Token authentication enabled ({} token(s))", settings.tokens.len());
    }

    let server_config = HttpServerConfig::default()
        .with_bind_addr(SocketAddr::new(settings.bind_ip, settings.http_port))
        .with_ws_path(&settings.ws_path);
    let bound = HttpServer::new(server_config, registry).bind().await?;

    info!("Subdomains will be: {{name}}.{}", settings.base_domain);

    bound
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down relay...");
        })
        .await?;

    audit.flush().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> RelaySettings {
        RelaySettings {
            base_domain: " Example.COM ".to_string(),
            bind_ip: IpAddr::from([127, 0, 0, 1]),
            http_port: 8080,
            ws_path: "/ws".to_string(),
            tokens: vec!["a".to_string(), " ".to_string(), " b ".to_string()],
            db_path: ":memory:".to_string(),
            public_scheme: "https".to_string(),
        }
    }

    #[test]
    fn test_normalized_settings() {
        let settings = settings().normalized().unwrap();
        assert_eq!(settings.base_domain, "example.com");
        assert_eq!(settings.tokens, vec!["a".to_string(), "b".to_string()]);

        let config = settings.registry_config();
        assert_eq!(config.base_domain, "example.com");
        assert_eq!(config.public_scheme, "https");
    }

    #[test]
    fn test_base_domain_required() {
        let settings = RelaySettings {
            base_domain: "  ".to_string(),
            ..settings()
        };
        assert!(settings.normalized().is_err());
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("auger.db");

        ensure_db_dir(db_path.to_str().unwrap()).unwrap();
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_ensure_db_dir_skips_memory_and_urls() {
        ensure_db_dir(":memory:").unwrap();
        ensure_db_dir("postgres://localhost/auger").unwrap();
        ensure_db_dir("auger.db").unwrap();
    }
}
