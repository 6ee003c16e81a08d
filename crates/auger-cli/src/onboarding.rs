//! First-run prompt for the relay URL and token

use anyhow::{bail, Context, Result};
use auger_client::build_ws_url;
use auger_proto::DEFAULT_WS_PATH;
use std::io::{BufRead, Write};

use crate::config::{CliConfig, ConfigManager};

/// Ask for the server URL (required) and token (optional)
pub fn prompt_config<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<CliConfig> {
    let server_url = ask(input, output, "Server URL (e.g., https://auger.example.com): ")?;
    let token = ask(input, output, "Auth token (leave blank if none): ")?;

    if server_url.is_empty() {
        bail!("Server URL is required");
    }
    build_ws_url(&server_url, DEFAULT_WS_PATH)?;

    Ok(CliConfig {
        server_url: Some(server_url),
        token: Some(token).filter(|t| !t.is_empty()),
        ws_path: Some(DEFAULT_WS_PATH.to_string()),
    })
}

/// Prompt on the terminal and persist the answers
pub fn run_onboarding(manager: &ConfigManager) -> Result<CliConfig> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let config = prompt_config(&mut input, &mut output)?;
    manager.save(&config)?;
    Ok(config)
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read from terminal")?;
    Ok(line.trim().to_string())
}
