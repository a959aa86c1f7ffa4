//! Tools command handler
//!
//! Print the merged catalog grouped by owning server.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::config::McpConfig;
use crate::mcp::{McpResult, McpTool, Orchestrator};

use super::connect_all;

/// Tools to print: one server's own listing, or the merged catalog.
///
/// A single server is asked directly so tools shadowed in the merged
/// catalog by an earlier server still show up.
pub async fn collect_tools(orch: &Orchestrator, server: Option<&str>) -> McpResult<Vec<McpTool>> {
    match server {
        Some(name) => orch.list_operations_from(name).await,
        None => Ok(orch.list_operations().await.into_tools()),
    }
}

/// Handle the `tools` command - list available MCP tools
pub async fn run_tools(config: &McpConfig, server_filter: Option<String>) -> Result<()> {
    println!("Configured servers: {}\n", config.server_names().join(", "));

    let orch = connect_all(config).await;
    let tools = collect_tools(&orch, server_filter.as_deref()).await;
    orch.shutdown().await;
    let tools = tools?;

    if tools.is_empty() {
        println!("No tools found.");
        return Ok(());
    }

    let mut by_server: BTreeMap<String, Vec<McpTool>> = BTreeMap::new();
    for tool in tools {
        by_server.entry(tool.server.clone()).or_default().push(tool);
    }

    for (server, tools) in by_server {
        println!("=== {} ({} tools) ===", server, tools.len());
        for tool in tools {
            let desc = tool
                .description
                .as_deref()
                .unwrap_or("No description")
                .lines()
                .next()
                .unwrap_or("");
            println!("  {} - {}", tool.name, desc);
        }
        println!();
    }

    Ok(())
}
