//! E2E tests against the workspace MCP server binary
//!
//! These tests require:
//! - Workspace built (cargo build --workspace)
//! - git on PATH
//!
//! Run with: cargo test --test e2e -- --include-ignored

#[path = "e2e/workspace_worker.rs"]
mod workspace_worker;
