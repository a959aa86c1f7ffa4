//! MCP Server implementation for workspace operations
//!
//! Tool failures (bad paths, missing files, git errors) are returned as
//! `isError` results so the caller sees them as data.

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::params::*;
use crate::workspace::{Workspace, WorkspaceError, WorkspaceResult};

/// The Workspace MCP Server
#[derive(Clone)]
pub struct WorkspaceMcpServer {
    workspace: Workspace,
    tool_router: ToolRouter<Self>,
}

fn to_result(outcome: WorkspaceResult<String>) -> Result<CallToolResult, McpError> {
    Ok(match outcome {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => {
            tracing::debug!("Tool failed: {}", e);
            CallToolResult::error(vec![Content::text(e.to_string())])
        }
    })
}

// ============================================================================
// Tool Router
// ============================================================================

#[tool_router]
impl WorkspaceMcpServer {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            tool_router: Self::tool_router(),
        }
    }

    /// Server rooted at `WORKSPACE_DIR` (default `./workspace`)
    pub fn from_env() -> Result<Self, WorkspaceError> {
        Workspace::from_env().map(Self::new)
    }

    pub fn root(&self) -> &std::path::Path {
        self.workspace.root()
    }

    #[tool(description = "Create a file in the workspace with the given content. Overwrites an existing file.")]
    async fn create_file(
        &self,
        Parameters(params): Parameters<CreateFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .workspace
            .create_file(&params.filename, &params.content)
            .await
            .map(|_| format!("Created {} ({} bytes)", params.filename, params.content.len()));
        to_result(outcome)
    }

    #[tool(description = "Read a file from the workspace and return its content.")]
    async fn read_file(
        &self,
        Parameters(params): Parameters<ReadFileParams>,
    ) -> Result<CallToolResult, McpError> {
        to_result(self.workspace.read_file(&params.filename).await)
    }

    #[tool(description = "List every file in the workspace, one relative path per line.")]
    async fn list_files(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.workspace.list_files().await.map(|files| {
            if files.is_empty() {
                "Workspace is empty".to_string()
            } else {
                files.join("\n")
            }
        });
        to_result(outcome)
    }

    #[tool(description = "Initialize a git repository in the workspace.")]
    async fn git_init(&self) -> Result<CallToolResult, McpError> {
        to_result(self.workspace.git(&["init"]).await)
    }

    #[tool(description = "Stage every change in the workspace (git add .).")]
    async fn git_add(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.workspace.git(&["add", "."]).await.map(|out| {
            if out.is_empty() {
                "Staged all changes".to_string()
            } else {
                out
            }
        });
        to_result(outcome)
    }

    #[tool(description = "Commit staged changes with the given message.")]
    async fn git_commit(
        &self,
        Parameters(params): Parameters<GitCommitParams>,
    ) -> Result<CallToolResult, McpError> {
        to_result(self.workspace.git(&["commit", "-m", &params.message]).await)
    }

    #[tool(description = "Show the short git status of the workspace.")]
    async fn git_status(&self) -> Result<CallToolResult, McpError> {
        let outcome = self
            .workspace
            .git(&["status", "--short", "--branch"])
            .await;
        to_result(outcome)
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for WorkspaceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "File and git tools confined to one workspace directory. \
                 All paths are relative to the workspace root."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
