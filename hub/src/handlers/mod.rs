//! Command handlers
//!
//! One module per CLI subcommand. Every handler registers the configured
//! servers, does its work, and shuts the orchestrator down before returning,
//! including when the work itself failed.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::McpConfig;
use crate::mcp::Orchestrator;

pub mod call;
pub mod status;
pub mod tools;

pub use call::run_call_tool;
pub use status::run_status;
pub use tools::run_tools;

/// Load the explicit config file, or discover `.mcp.json`
pub fn load_config(path: Option<&Path>) -> Result<McpConfig> {
    match path {
        Some(path) => McpConfig::load_from_path(path),
        None => McpConfig::load()?.context(
            "No .mcp.json found in current directory, its parents or ~/.config/mcp-hub/",
        ),
    }
}

/// Register every configured server. Failures are reported, not fatal.
pub async fn connect_all(config: &McpConfig) -> Orchestrator {
    let orch = Orchestrator::new();
    for (name, err) in orch.register_all(config).await {
        eprintln!("warning: {}: {}", name, err);
    }
    orch
}
