//! Status command handler

use anyhow::Result;

use crate::config::McpConfig;
use crate::mcp::{ConnectionState, ConnectionStatus};

use super::connect_all;

/// Handle the `status` command - start every server and report its state
pub async fn run_status(config: &McpConfig, verbose: bool) -> Result<()> {
    let orch = connect_all(config).await;

    // Populate tool counts for ready connections
    let catalog = orch.list_operations().await;
    let status = orch.status();
    orch.shutdown().await;

    if status.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    println!("=== MCP servers ({}) ===\n", status.len());
    for entry in &status {
        print_entry(entry, verbose);
    }

    let ready = status
        .iter()
        .filter(|s| s.state == ConnectionState::Ready)
        .count();
    println!("\n{}/{} ready, {} tools", ready, status.len(), catalog.len());
    Ok(())
}

fn print_entry(entry: &ConnectionStatus, verbose: bool) {
    let marker = match entry.state {
        ConnectionState::Ready => "✓",
        state if state.is_terminal() => "✗",
        _ => "…",
    };
    let pid = entry
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let tools = entry
        .tool_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {} {:<20} {:<14} pid {:<8} tools {}",
        marker, entry.name, entry.state, pid, tools
    );

    if verbose {
        if let Some(info) = &entry.server_info {
            println!("      server:   {} {}", info.name, info.version);
        }
        if let Some(version) = &entry.protocol_version {
            println!("      protocol: {}", version);
        }
        println!("      uptime:   {:.1}s", entry.uptime.as_secs_f64());
    }
}
