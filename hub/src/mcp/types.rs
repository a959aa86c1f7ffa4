//! MCP type definitions
//!
//! Shared types used by sessions, the orchestrator and the CLI handlers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool from an MCP server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpTool {
    /// Connection this tool belongs to
    pub server: String,
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema (JSON)
    pub input_schema: Option<Value>,
}

/// Handshake state of a connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// Process spawned, handshake not started
    Uninitialized,
    /// `initialize` sent, waiting for the response
    Initializing,
    /// Compatible `initialize` response received
    Initialized,
    /// `notifications/initialized` sent, accepting calls
    Ready,
    /// Transport or protocol failure
    Failed,
    /// Shut down explicitly
    Closed,
}

impl ConnectionState {
    /// Closed and Failed connections never leave their state
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "uninitialized"),
            ConnectionState::Initializing => write!(f, "initializing"),
            ConnectionState::Initialized => write!(f, "initialized"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Identity reported by the server in its `initialize` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Snapshot of one registered connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub state: ConnectionState,
    pub pid: Option<u32>,
    pub tool_count: Option<usize>,
    pub pending_requests: usize,
    pub uptime: Duration,
    pub protocol_version: Option<String>,
    pub server_info: Option<ServerInfo>,
}

/// A root directory advertised to servers through `roots/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub uri: String,
    pub name: String,
}

/// A notification received from a server
#[derive(Debug, Clone)]
pub struct ServerNotification {
    /// Connection the notification arrived on
    pub server: String,
    pub method: String,
    pub params: Option<Value>,
}

/// Result of a `tools/call` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolCallResult {
    /// Text parts of the result joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content from a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Merged tool listing across connections, keyed by tool name
///
/// Built once per listing. When two connections advertise the same tool name
/// the first one (in connection-name order) owns it.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tools: Vec<McpTool>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_tools(tools: impl IntoIterator<Item = McpTool>) -> Self {
        let mut catalog = Catalog::default();
        for tool in tools {
            if let Some(existing) = catalog.get(&tool.name) {
                tracing::debug!(
                    tool = %tool.name,
                    owner = %existing.server,
                    shadowed = %tool.server,
                    "Duplicate tool name, keeping first owner"
                );
                continue;
            }
            catalog.index.insert(tool.name.clone(), catalog.tools.len());
            catalog.tools.push(tool);
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<&McpTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Connection that owns a tool
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.get(name).map(|t| t.server.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &McpTool> {
        self.tools.iter()
    }

    pub fn into_tools(self) -> Vec<McpTool> {
        self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> McpTool {
        McpTool {
            server: server.to_string(),
            name: name.to_string(),
            description: None,
            input_schema: None,
        }
    }

    #[test]
    fn test_catalog_dedups_by_name() {
        let catalog = Catalog::from_tools(vec![
            tool("a", "read"),
            tool("a", "write"),
            tool("b", "read"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.owner("read"), Some("a"));
        assert_eq!(catalog.owner("write"), Some("a"));
        assert_eq!(catalog.owner("missing"), None);
    }

    #[test]
    fn test_tool_result_text() {
        let result: ToolCallResult = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "two"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.text(), "one\ntwo");
        assert!(!result.is_error);
        assert_eq!(result.content[1].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Initialized.is_terminal());
    }
}
