// mathnoted: standalone notebook server.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mathnote_server::config::{ServerConfig, DEFAULT_LOG_FILTER};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mathnoted", version, about = "Serve mathnote notebooks over WebSocket")]
struct Args {
    /// Config file (defaults to ~/.mathnote/server.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from(path)
            .with_context(|| format!("failed to load config from `{}`", path.display()))?,
        None => ServerConfig::load(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(listen_addr = %config.listen_addr, "starting mathnote server");
    mathnote_server::runtime::run_standalone(config.normalized())
        .await
        .context("notebook server terminated unexpectedly")
}
