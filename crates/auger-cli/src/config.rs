//! Agent configuration file and precedence rules
//!
//! Stores the relay URL and token in `$XDG_CONFIG_HOME/auger/config.json`
//! (falling back to `~/.config/auger/config.json`). Command-line flags win over
//! environment variables, which win over the file.

use anyhow::{Context, Result};
use auger_proto::DEFAULT_WS_PATH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_path: Option<String>,
}

/// Values supplied on the command line or through `AUGER_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub token: Option<String>,
    pub ws_path: Option<String>,
}

impl ConfigOverrides {
    /// `AUGER_SERVER`, `AUGER_TOKEN` and `AUGER_WS_PATH`
    pub fn from_env() -> Self {
        Self {
            server: std::env::var("AUGER_SERVER").ok(),
            token: std::env::var("AUGER_TOKEN").ok(),
            ws_path: std::env::var("AUGER_WS_PATH").ok(),
        }
    }
}

/// Fully merged agent settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub server_url: Option<String>,
    pub token: Option<String>,
    pub ws_path: String,
}

/// Merge flags, environment and file. Blank values count as unset.
pub fn merge_config(file: &CliConfig, env: &ConfigOverrides, flags: &ConfigOverrides) -> ResolvedConfig {
    fn pick(candidates: [Option<&String>; 3]) -> Option<String> {
        candidates
            .into_iter()
            .flatten()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }

    ResolvedConfig {
        server_url: pick([flags.server.as_ref(), env.server.as_ref(), file.server_url.as_ref()]),
        token: pick([flags.token.as_ref(), env.token.as_ref(), file.token.as_ref()]),
        ws_path: pick([flags.ws_path.as_ref(), env.ws_path.as_ref(), file.ws_path.as_ref()])
            .unwrap_or_else(|| DEFAULT_WS_PATH.to_string()),
    }
}

/// Directory holding `auger/config.json`
pub fn config_base_dir(xdg_config_home: Option<&str>, home: Option<&Path>) -> Option<PathBuf> {
    match xdg_config_home.map(str::trim).filter(|v| !v.is_empty()) {
        Some(xdg) => Some(PathBuf::from(xdg)),
        None => home.map(|home| home.join(".config")),
    }
}

/// Configuration file manager
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Manager for the per-user config location
    pub fn user_default() -> Result<Self> {
        let xdg = std::env::var("XDG_CONFIG_HOME").ok();
        let home = dirs::home_dir();
        let base = config_base_dir(xdg.as_deref(), home.as_deref())
            .context("Failed to get home directory")?;
        Ok(Self::new(base.join("auger").join("config.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration from disk; a missing file is an empty config
    pub fn load(&self) -> Result<CliConfig> {
        if !self.path.exists() {
            return Ok(CliConfig::default());
        }

        let json = fs::read_to_string(&self.path)
            .context(format!("Failed to read config file: {:?}", self.path))?;

        let config: CliConfig = serde_json::from_str(&json)
            .context(format!("Failed to parse config file: {:?}", self.path))?;

        Ok(config)
    }

    /// Save the configuration to disk
    pub fn save(&self, config: &CliConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.path, json)
            .context(format!("Failed to write config file: {:?}", self.path))?;

        Ok(())
    }
}
