//! # Courier Server
//!
//! Push channel server: one channel per authenticated client and path,
//! drained over WebSocket or HTTP long-poll.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with custom config
//! courier --config /path/to/courier.toml
//!
//! # Run with environment variables
//! COURIER_PORT=8080 COURIER_HEARTBEAT__TIMEOUT_MS=60000 courier
//! ```

mod config;
mod handlers;
mod metrics;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "courier", version)]
#[command(about = "Push channel server over WebSocket and HTTP long-poll", long_about = None)]
struct Args {
    /// Config file path (default: search courier.toml, /etc/courier, ~/.config/courier)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_core=debug,courier_transport=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["courier", "--config", "/etc/c.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/c.toml")));

        let args = Args::try_parse_from(["courier", "-c", "local.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));

        let args = Args::try_parse_from(["courier"]).unwrap();
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(Args::try_parse_from(["courier", "--bogus"]).is_err());
        assert!(Args::try_parse_from(["courier", "--config"]).is_err());

        let help = Args::try_parse_from(["courier", "--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
