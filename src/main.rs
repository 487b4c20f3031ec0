//! evtun CLI - tunnel TCP connections over HTTP polling
//!
//! Run the client role next to the applications and the server role next to
//! the destination; only the server's HTTP port has to be reachable.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use evtun_lib::{Client, ClientConfig, Server, ServerConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;

/// evtun - tunnel TCP connections over HTTP polling
#[derive(Parser, Debug)]
#[command(name = "evtun")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ",
    env!("EVTUN_GIT_HASH"),
    "\nBuilt: ",
    env!("EVTUN_BUILD_TIME")
))]
#[command(long_about = r#"
Tunnel TCP connections over plain HTTP request/response polling.

EXAMPLES:
  # Server side, dialing the destination named in server.yaml
  evtun --mode server --config server.yaml

  # Client side, accepting local connections
  evtun --mode client --config client.yaml

  # Print a configuration template
  evtun --mode client --print-template > client.yaml

ENVIRONMENT VARIABLES:
  EVTUN_MODE       Role to run (client or server)
  EVTUN_CONFIG     Path to the YAML configuration document
  EVTUN_LOG_LEVEL  Log level (overridden by RUST_LOG)
"#)]
struct Cli {
    /// Role to run
    #[arg(short, long, value_enum, env = "EVTUN_MODE")]
    mode: Mode,

    /// Path to the YAML configuration document
    #[arg(short, long, env = "EVTUN_CONFIG", required_unless_present = "print_template")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "EVTUN_LOG_LEVEL")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long)]
    debug: bool,

    /// Print a configuration template for the selected mode and exit
    #[arg(long)]
    print_template: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Accept local connections and forward them to the server
    Client,
    /// Serve the HTTP endpoints and dial the destination
    Server,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_template {
        match cli.mode {
            Mode::Client => print!("{}", ClientConfig::template()),
            Mode::Server => print!("{}", ServerConfig::template()),
        }
        return Ok(());
    }

    let log_level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    init_logging(log_level)?;

    let config_path = cli.config.context("--config is required")?;
    match cli.mode {
        Mode::Client => run_client(&config_path).await,
        Mode::Server => run_server(&config_path).await,
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

async fn run_client(path: &Path) -> Result<()> {
    let config = ClientConfig::load(path)
        .with_context(|| format!("Failed to load client config: {:?}", path))?;
    info!("client config:\n{}", config.to_pretty_json());

    let client = Client::bind(config).await.context("Failed to start client")?;
    info!("accepting local connections on {}", client.local_addr()?);

    tokio::select! {
        _ = client.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

async fn run_server(path: &Path) -> Result<()> {
    let config = ServerConfig::load(path)
        .with_context(|| format!("Failed to load server config: {:?}", path))?;
    info!("server config:\n{}", config.to_pretty_json());

    let server = Server::bind(config).await.context("Failed to start server")?;
    info!("serving events on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_mode_and_config() {
        let cli = Cli::try_parse_from(["evtun", "--mode", "server", "--config", "server.yaml"]).unwrap();
        assert_eq!(cli.mode, Mode::Server);
        assert_eq!(cli.config, Some(PathBuf::from("server.yaml")));
        assert_eq!(cli.log_level, "info");
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_requires_config() {
        assert!(Cli::try_parse_from(["evtun", "--mode", "client"]).is_err());
        assert!(Cli::try_parse_from(["evtun", "--mode", "client", "--print-template"]).is_ok());
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["evtun", "--mode", "proxy", "--config", "x.yaml"]).is_err());
    }
}
