//! Configuration loading

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mcp::Root;

/// Config file looked up by [`McpConfig::load`]
pub const CONFIG_FILE_NAME: &str = ".mcp.json";

/// Default startup timeout for spawning and initializing an MCP server
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/mcp-hub/
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("mcp-hub").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// MCP server configuration (from .mcp.json)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// How to launch and talk to one server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment; values go through `$VAR` expansion at spawn time
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Deadline for spawn + initialize handshake
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
    /// Deadline for each request; 0 disables it
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Directories exposed to the server through `roots/list`
    #[serde(default)]
    pub roots: Vec<RootConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_secs = Some(timeout.map(|t| t.as_secs().max(1)).unwrap_or(0));
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT)
    }

    /// `None` means requests wait until answered or the connection fails
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Roots as advertised on the wire (`file://` URIs)
    pub fn roots(&self) -> Vec<Root> {
        self.roots
            .iter()
            .map(|root| {
                let absolute = std::fs::canonicalize(&root.path).unwrap_or_else(|_| {
                    std::env::current_dir()
                        .map(|cwd| cwd.join(&root.path))
                        .unwrap_or_else(|_| root.path.clone())
                });
                let name = root.name.clone().unwrap_or_else(|| {
                    absolute
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| absolute.display().to_string())
                });
                Root {
                    uri: format!("file://{}", absolute.display()),
                    name,
                }
            })
            .collect()
    }
}

impl McpConfig {
    /// Load MCP config from .mcp.json
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .mcp.json
    /// 2. Check ~/.config/mcp-hub/.mcp.json (global fallback)
    pub fn load() -> Result<Option<Self>> {
        if let Some(config_path) = find_config_file(CONFIG_FILE_NAME) {
            tracing::debug!("Loading MCP config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No {} found", CONFIG_FILE_NAME);
        Ok(None)
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: McpConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Configured server names in sorted order
    pub fn server_names(&self) -> Vec<String> {
        self.mcp_servers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "mcpServers": {
                    "workspace": {
                        "command": "workspace-mcp",
                        "env": {"WORKSPACE_DIR": "$HOME/ws"},
                        "requestTimeoutSecs": 0,
                        "roots": [{"path": "."}]
                    },
                    "git": {
                        "command": "uvx",
                        "args": ["mcp-server-git"],
                        "startupTimeoutSecs": 5
                    }
                }
            }"#,
        )
        .unwrap();

        let config = McpConfig::load_from_path(&path).unwrap();
        assert_eq!(config.server_names(), vec!["git", "workspace"]);

        let git = &config.mcp_servers["git"];
        assert_eq!(git.args, vec!["mcp-server-git"]);
        assert_eq!(git.startup_timeout(), Duration::from_secs(5));
        assert_eq!(git.request_timeout(), Some(DEFAULT_REQUEST_TIMEOUT));

        let ws = &config.mcp_servers["workspace"];
        assert_eq!(ws.request_timeout(), None);
        assert_eq!(ws.startup_timeout(), DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(ws.env["WORKSPACE_DIR"], "$HOME/ws");
        let roots = ws.roots();
        assert_eq!(roots.len(), 1);
        assert!(roots[0].uri.starts_with("file:///"));
    }

    #[test]
    fn test_load_rejects_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"mcpServers": {"broken": {"args": []}}}"#).unwrap();
        assert!(McpConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn test_root_name_defaults_to_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("demo_workspace");
        std::fs::create_dir(&ws).unwrap();
        let mut config = McpServerConfig::new("true", Vec::<String>::new());
        config.roots.push(RootConfig {
            path: ws,
            name: None,
        });
        let roots = config.roots();
        assert_eq!(roots[0].name, "demo_workspace");
        assert!(roots[0].uri.ends_with("demo_workspace"));
    }
}
