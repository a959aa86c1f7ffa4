//! MCP (Model Context Protocol) client runtime
//!
//! Spawns MCP servers defined in .mcp.json, drives each one through its own
//! [`ConnectionSession`] and exposes them together through the [`Orchestrator`].

mod error;
mod orchestrator;
pub mod protocol;
mod session;
mod spawn;
mod types;

pub use error::{McpError, McpResult};
pub use orchestrator::Orchestrator;
pub use session::{ConnectionSession, NotificationSink, SessionOptions};
pub use spawn::{
    LaunchedProcess, LineEvent, LineReader, LineWriter, ProcessHandle, ProcessLauncher,
    DEFAULT_SHUTDOWN_GRACE,
};
pub use types::{
    Catalog, ConnectionState, ConnectionStatus, McpTool, Root, ServerInfo, ServerNotification,
    ToolCallResult, ToolContent,
};
