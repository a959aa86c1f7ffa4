//! mcp-hub library
//!
//! Runs several MCP servers as child processes and talks JSON-RPC to each of
//! them over stdio. See [`mcp::Orchestrator`] for the entry point.

pub mod config;
pub mod handlers;
pub mod mcp;
