//! engine-relay
//!
//! Exposes an engine daemon's Unix control socket on TCP and pins older
//! clients to the daemon's API version.
//!
//! ```text
//!   TCP client                      ┌────────────────────────────────┐
//!   (old API)   ──── /v1.40/... ───▶│ listener → relay               │
//!                                   │   outbound: frame + rewrite ───┼──▶ /var/run/docker.sock
//!               ◀── verbatim ───────│   inbound:  passthrough  ◀─────┼───  (engine daemon)
//!                                   └────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use engine_relay::config::{read_config, validate_config, ConfigError, RelayConfig};
use engine_relay::lifecycle::startup;
use engine_relay::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "engine-relay")]
#[command(about = "Version-pinning TCP relay for an engine daemon's Unix socket", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides listener.bind_address
    #[arg(short, long)]
    listen: Option<String>,

    /// Daemon socket path, overrides upstream.socket_path
    #[arg(short, long)]
    upstream: Option<PathBuf>,

    /// API version pinned into rewritten headers, overrides rewrite.target_version
    #[arg(long)]
    target_version: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.socket_path = upstream.clone();
        }
        if let Some(version) = &self.target_version {
            config.rewrite.target_version = version.clone();
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_logging(&config.observability)?;

    tracing::info!("engine-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = ?config.upstream.socket_path,
        max_connections = config.listener.max_connections,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
