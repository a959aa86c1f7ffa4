//! Error taxonomy for MCP connections
//!
//! Errors are `Clone` because a single transport failure is delivered to every
//! request that was outstanding on the connection when it failed.

use std::time::Duration;

use serde_json::Value;

use super::types::ConnectionState;

/// Result type for MCP connection operations
pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    /// The server process could not be started
    #[error("failed to launch MCP server '{server}' ({command}): {reason}")]
    Launch {
        server: String,
        command: String,
        reason: String,
    },

    /// The stream closed or the process exited while the connection was in use
    #[error("transport error on '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// Malformed line, unexpected identifier or incompatible handshake
    #[error("protocol error on '{server}': {reason}")]
    Protocol { server: String, reason: String },

    /// A single request exceeded its deadline
    #[error("request {id} ({method}) to '{server}' timed out after {timeout:?}")]
    Timeout {
        server: String,
        method: String,
        id: u64,
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error object
    #[error("server '{server}' returned error {code}: {message}")]
    Application {
        server: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("connection '{0}' is closed")]
    ConnectionClosed(String),

    #[error("connection '{server}' is not ready (state: {state})")]
    NotReady {
        server: String,
        state: ConnectionState,
    },

    #[error("connection '{0}' is already registered")]
    DuplicateName(String),

    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("tool '{0}' not found on any ready connection")]
    UnknownTool(String),
}

impl McpError {
    pub(crate) fn transport(server: &str, reason: impl Into<String>) -> Self {
        McpError::Transport {
            server: server.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(server: &str, reason: impl Into<String>) -> Self {
        McpError::Protocol {
            server: server.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error leaves the connection unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::Transport { .. } | McpError::Protocol { .. } | McpError::ConnectionClosed(_)
        )
    }
}
