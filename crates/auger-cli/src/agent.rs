//! `auger http`: one independent tunnel per port spec

use anyhow::{bail, Context, Result};
use auger_client::{build_ws_url, parse_port_spec, AgentConfig, TunnelAgent, TunnelSpec};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::ResolvedConfig;

/// Parse port specs and apply the global `--subdomain`.
///
/// The global subdomain only makes sense for a single port, and an inline
/// `port:subdomain` wins over it.
pub fn plan_tunnels(specs: &[String], subdomain: Option<String>) -> Result<Vec<TunnelSpec>> {
    if specs.is_empty() {
        bail!("Local port is required");
    }
    if subdomain.is_some() && specs.len() > 1 {
        bail!("--subdomain can only be used with a single port; use <port>:<subdomain> instead");
    }

    let mut tunnels = specs
        .iter()
        .map(|spec| parse_port_spec(spec))
        .collect::<Result<Vec<_>, _>>()?;

    if let (Some(subdomain), [only]) = (subdomain, tunnels.as_mut_slice()) {
        if only.subdomain.is_none() {
            only.subdomain = Some(subdomain);
        }
    }

    Ok(tunnels)
}

/// Run every tunnel until all stop or Ctrl+C.
///
/// Fails if any tunnel ended on its own, since that only happens on a relay
/// rejection or an exhausted reconnect budget.
pub async fn run_tunnels(tunnels: Vec<TunnelSpec>, config: &ResolvedConfig) -> Result<()> {
    let server_url = config
        .server_url
        .as_deref()
        .context("Server URL is not configured; run `auger init`")?;
    let ws_url = build_ws_url(server_url, &config.ws_path)?;
    info!("Connecting to {}", ws_url);

    let mut set = JoinSet::new();
    for tunnel in tunnels {
        let agent_config = AgentConfig::new(ws_url.clone(), tunnel.port)
            .with_token(config.token.clone())
            .with_subdomain(tunnel.subdomain.clone());
        set.spawn(async move {
            let mut agent = TunnelAgent::new(agent_config);
            let result = agent.run().await;
            (tunnel.label(), result)
        });
    }

    let mut failed = 0usize;
    loop {
        tokio::select! {
            next = set.join_next() => match next {
                None => break,
                Some(Ok((_, Ok(())))) => {}
                Some(Ok((label, Err(e)))) => {
                    error!("[{}] Tunnel stopped: {}", label, e);
                    failed += 1;
                }
                Some(Err(e)) => {
                    error!("Tunnel task panicked: {}", e);
                    failed += 1;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                set.abort_all();
                return Ok(());
            }
        }
    }

    if failed > 0 {
        bail!("{} tunnel(s) stopped with an error", failed);
    }
    Ok(())
}
