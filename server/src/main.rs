use anyhow::{Context, Result};
use clap::Parser;
use search_core::AppConfig;
use server::{build_app, build_state};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,
    /// Override the index directory from the configuration
    #[arg(long)]
    db: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(db) = args.db {
        config.storage.path = db;
    }

    let state = build_state(&config)?;
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, sites = config.sites.len(), "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
