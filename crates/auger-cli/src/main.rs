//! Auger CLI - expose local HTTP servers through a reverse tunnel

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auger_cli::agent::{plan_tunnels, run_tunnels};
use auger_cli::config::{merge_config, ConfigManager, ConfigOverrides};
use auger_cli::onboarding::run_onboarding;
use auger_cli::relay::{run_relay, RelaySettings};

/// Auger - expose local HTTP servers on a public subdomain
#[derive(Parser, Debug)]
#[command(name = "auger")]
#[command(about = "Expose local HTTP servers through a reverse tunnel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expose one or more local ports (`auger <port>` is a shortcut)
    Http {
        /// Local ports, each optionally with a subdomain: 3000 or 3000:myapp
        #[arg(required = true, value_name = "PORT[:SUBDOMAIN]")]
        ports: Vec<String>,

        /// Requested subdomain (single port only)
        #[arg(long)]
        subdomain: Option<String>,

        /// Relay server URL, e.g. https://auger.example.com
        #[arg(long)]
        server: Option<String>,

        /// Authentication token
        #[arg(long)]
        token: Option<String>,

        /// Control endpoint path on the relay
        #[arg(long)]
        ws_path: Option<String>,
    },
    /// Save the relay URL and token to the user config file
    Init,
    /// Run the relay server
    Relay {
        /// Public base domain; tunnels are served on <name>.<domain>
        #[arg(long, env = "AUGER_BASE_DOMAIN")]
        base_domain: String,

        /// Address to bind
        #[arg(long, env = "AUGER_BIND", default_value = "0.0.0.0")]
        bind: IpAddr,

        /// HTTP port for public traffic and agent connections
        #[arg(long, env = "AUGER_HTTP_PORT", default_value_t = 8080)]
        http_port: u16,

        /// Control endpoint path
        #[arg(long, env = "AUGER_WS_PATH", default_value = "/ws")]
        ws_path: String,

        /// Accepted agent tokens, comma-separated (empty = open access)
        #[arg(long, env = "AUGER_TOKENS", value_delimiter = ',')]
        tokens: Vec<String>,

        /// SQLite database path for the audit trail (`:memory:` for none on disk)
        #[arg(long, env = "AUGER_DB_PATH", default_value = "./data/auger.db")]
        db_path: String,

        /// Scheme used in public URLs handed to agents
        #[arg(long, env = "AUGER_PUBLIC_SCHEME", default_value = "http")]
        public_scheme: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Crypto provider for wss:// control connections
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    let cli = Cli::parse_from(auger_cli::normalize_args(std::env::args().collect()));

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Http {
            ports,
            subdomain,
            server,
            token,
            ws_path,
        } => {
            let tunnels = plan_tunnels(&ports, subdomain)?;

            let manager = ConfigManager::user_default()?;
            let flags = ConfigOverrides {
                server,
                token,
                ws_path,
            };
            let env = ConfigOverrides::from_env();
            let mut config = merge_config(&manager.load()?, &env, &flags);

            if config.server_url.is_none() {
                let saved = run_onboarding(&manager)?;
                config = merge_config(&saved, &env, &flags);
            }

            if config.token.is_none() {
                warn!("No auth token set. If the server requires auth, connection will fail.");
            }

            run_tunnels(tunnels, &config).await
        }
        Commands::Init => {
            let manager = ConfigManager::user_default()?;
            run_onboarding(&manager)?;
            println!("Config saved to {}", manager.path().display());
            Ok(())
        }
        Commands::Relay {
            base_domain,
            bind,
            http_port,
            ws_path,
            tokens,
            db_path,
            public_scheme,
        } => {
            run_relay(RelaySettings {
                base_domain,
                bind_ip: bind,
                http_port,
                ws_path,
                tokens,
                db_path,
                public_scheme,
            })
            .await
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
