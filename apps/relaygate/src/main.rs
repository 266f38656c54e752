use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use relaygate_core::bootstrap::CliArgs;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let log_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let state = Arc::new(relaygate_core::bootstrap::bootstrap(args).await?);
    let app = relaygate_router::gateway_router(state.clone());

    let bind = format!("{}:{}", state.host, state.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
