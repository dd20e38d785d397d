//! Reference MCP tool server offering `add`, spoken over stdio.

use anyhow::{Context, Result};
use tokio::io::{self, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcpcalc_tui::server::McpServer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mcpcalc=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    tracing::info!("mcpcalc-server v{} listening on stdio", env!("CARGO_PKG_VERSION"));

    McpServer::new()
        .serve(BufReader::new(io::stdin()), io::stdout())
        .await
        .context("Server failed")?;
    Ok(())
}
