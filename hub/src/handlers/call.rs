//! Call command handler

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::McpConfig;
use crate::mcp::{Orchestrator, ToolCallResult};

use super::connect_all;

/// Handle the `call` command - call a tool directly
pub async fn run_call_tool(
    config: &McpConfig,
    tool_name: &str,
    server: Option<String>,
    args: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let arguments: Option<Value> = match args {
        Some(json) => Some(serde_json::from_str(&json).context("--args is not valid JSON")?),
        None => None,
    };

    println!("Calling tool: {}", tool_name);
    if let Some(ref a) = arguments {
        println!("Arguments: {}", serde_json::to_string_pretty(a)?);
    }
    println!();

    let orch = connect_all(config).await;
    let result = call(&orch, tool_name, server, arguments, timeout_secs).await;
    orch.shutdown().await;
    let result = result?;

    if result.is_error {
        println!("Tool reported an error:");
    } else {
        println!("Result:");
    }
    for content in &result.content {
        match &content.text {
            Some(text) => println!("{}", text),
            None => println!("[{} content]", content.content_type),
        }
    }
    if let Some(structured) = &result.structured_content {
        println!("{}", serde_json::to_string_pretty(structured)?);
    }

    Ok(())
}

async fn call(
    orch: &Orchestrator,
    tool_name: &str,
    server: Option<String>,
    arguments: Option<Value>,
    timeout_secs: Option<u64>,
) -> Result<ToolCallResult> {
    let server = match server {
        Some(server) => server,
        None => orch.owner_of(tool_name).await?,
    };
    tracing::debug!(server = %server, tool = tool_name, "Invoking tool");

    let result = match timeout_secs {
        Some(secs) => {
            orch.invoke_with_timeout(&server, tool_name, arguments, Some(Duration::from_secs(secs)))
                .await?
        }
        None => orch.invoke(&server, tool_name, arguments).await?,
    };
    Ok(result)
}
