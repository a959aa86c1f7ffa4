//! Parameter types for Workspace MCP tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreateFileParams {
    #[schemars(description = "File path relative to the workspace")]
    pub filename: String,

    #[schemars(description = "Content to write to the file")]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    #[schemars(description = "File path relative to the workspace")]
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GitCommitParams {
    #[schemars(description = "Commit message")]
    pub message: String,
}
