use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ringkv_server::config::NodeConfig;
use ringkv_server::node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (RINGKV_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("RINGKV_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("ringkv_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = NodeConfig::parse();
    // Reject a malformed seed address before binding anything.
    let seed = config.seed_addr()?;

    let node = Node::bind(&config).await?;
    match &seed {
        Some(seed) => node.join(seed).await?,
        None => tracing::info!(node = node.own().id, "Starting as ring seed"),
    }

    let listener =
        tokio::net::TcpListener::bind((config.host.as_str(), config.http_port)).await?;
    tracing::info!("HTTP listener on {}", listener.local_addr()?);
    let router = ringkv_server::web::router(Arc::clone(&node));
    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("HTTP server error: {e}");
        }
    });

    // Graceful shutdown on SIGTERM/SIGINT: the store must be closed so
    // the database files are not left locked.
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
    }
    http_task.abort();
    node.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
