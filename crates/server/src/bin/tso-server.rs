//! tso-server: centralized timestamp oracle and commit arbiter

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tso_server::{ServerConfig, ServerError, TsoServer};

/// Timestamp oracle server
#[derive(Parser, Debug)]
#[command(name = "tso-server")]
#[command(about = "Grants transaction timestamps and decides commit conflicts")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "TSO_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of the timestamp log (overrides the configuration file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.listen_host = host;
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let server = TsoServer::bind(&config).await.context("starting server")?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt");
            shutdown.shutdown();
        }
    });

    match server.run().await {
        Ok(()) => Ok(()),
        Err(e @ ServerError::Halted(_)) => {
            error!(error = %e, "Timestamp oracle halted");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
