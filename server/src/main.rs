use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::build_app;
use sift_core::{EngineConfig, SearchOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Query log shared with the indexer's search command
    #[arg(long, default_value = "./query_log.txt")]
    log: PathBuf,
    /// JSON config file; SIFT_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,
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
    let cfg = EngineConfig::resolve(args.config.as_deref())?;
    let app: Router = build_app(&args.index, &args.log, SearchOptions::from(&cfg))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
