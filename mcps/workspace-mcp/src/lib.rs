//! Workspace MCP Library
//!
//! File and git operations confined to a single workspace directory.
//! Paths given to tools are always relative to that directory.

pub mod params;
pub mod server;
pub mod workspace;

pub use server::WorkspaceMcpServer;
pub use workspace::{Workspace, WorkspaceError};
