//! Workspace MCP - file and git tools over stdio
//!
//! The workspace directory comes from `WORKSPACE_DIR` (default: `./workspace`)
//! and is created on startup.

use rmcp::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workspace_mcp::WorkspaceMcpServer;

/// Logs go to stderr; stdout carries the protocol
fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("workspace_mcp=info".parse()?);
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let server = WorkspaceMcpServer::from_env()?;
    tracing::info!("Starting workspace MCP server in {}", server.root().display());

    let service = server.serve(rmcp::transport::stdio()).await?;
    tracing::info!("Server running, waiting for requests...");

    service.waiting().await?;
    tracing::info!("Server shutting down");
    Ok(())
}
