//! Connection registry
//!
//! Owns every [`ConnectionSession`] by name. Aggregate operations fan out
//! across ready connections concurrently; a slow or failed connection never
//! blocks the others.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;

use super::error::{McpError, McpResult};
use super::session::{ConnectionSession, NotificationSink, SessionOptions};
use super::types::{Catalog, ConnectionState, ConnectionStatus, McpTool, ToolCallResult};
use crate::config::{McpConfig, McpServerConfig};

struct Registered {
    config: McpServerConfig,
    session: Arc<ConnectionSession>,
}

/// Registry of named MCP connections
#[derive(Default)]
pub struct Orchestrator {
    connections: RwLock<HashMap<String, Registered>>,
    notifications: Option<NotificationSink>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward notifications from every connection to `sink`
    pub fn with_notification_sink(sink: NotificationSink) -> Self {
        Self {
            connections: RwLock::default(),
            notifications: Some(sink),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registered>> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registered>> {
        self.connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_options(&self, config: &McpServerConfig) -> SessionOptions {
        SessionOptions {
            notifications: self.notifications.clone(),
            ..SessionOptions::from_config(config)
        }
    }

    fn session(&self, name: &str) -> McpResult<Arc<ConnectionSession>> {
        self.read()
            .get(name)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| McpError::UnknownConnection(name.to_string()))
    }

    /// Spawn a server, register it under `name` and run the handshake.
    ///
    /// A launch failure registers nothing. A failed handshake leaves the
    /// connection registered in the Failed state, visible through
    /// [`status`](Self::status) and replaceable with [`restart`](Self::restart).
    pub async fn register(&self, name: &str, config: McpServerConfig) -> McpResult<()> {
        let session = {
            let mut connections = self.write();
            if connections.contains_key(name) {
                return Err(McpError::DuplicateName(name.to_string()));
            }
            let session = Arc::new(ConnectionSession::spawn(
                name,
                &config,
                self.session_options(&config),
            )?);
            connections.insert(
                name.to_string(),
                Registered {
                    config,
                    session: Arc::clone(&session),
                },
            );
            session
        };

        session.open().await
    }

    /// Register every server in `config` concurrently.
    ///
    /// Returns the names that failed along with their errors.
    pub async fn register_all(&self, config: &McpConfig) -> Vec<(String, McpError)> {
        let results = join_all(config.mcp_servers.iter().map(|(name, server)| async move {
            (name.clone(), self.register(name, server.clone()).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(server = %name, "Failed to register MCP server: {}", e);
                    Some((name, e))
                }
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn state(&self, name: &str) -> McpResult<ConnectionState> {
        self.session(name).map(|s| s.state())
    }

    fn ready_sessions(&self) -> Vec<Arc<ConnectionSession>> {
        let mut sessions: Vec<_> = self
            .read()
            .values()
            .filter(|entry| entry.session.state() == ConnectionState::Ready)
            .map(|entry| Arc::clone(&entry.session))
            .collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    /// Merged catalog of every ready connection.
    ///
    /// Connections that are not ready, or whose listing fails, are skipped.
    pub async fn list_operations(&self) -> Catalog {
        let sessions = self.ready_sessions();
        let listings = join_all(sessions.iter().map(|session| session.list_tools())).await;

        let mut tools: Vec<McpTool> = Vec::new();
        for (session, listing) in sessions.iter().zip(listings) {
            match listing {
                Ok(list) => tools.extend(list),
                Err(e) => tracing::warn!(server = %session.name(), "Failed to list tools: {}", e),
            }
        }
        Catalog::from_tools(tools)
    }

    /// Tools advertised by one connection
    pub async fn list_operations_from(&self, name: &str) -> McpResult<Vec<McpTool>> {
        self.session(name)?.list_tools().await
    }

    /// Call `tool` on connection `name` with its configured request deadline
    pub async fn invoke(&self, name: &str, tool: &str, arguments: Option<Value>) -> McpResult<ToolCallResult> {
        let session = self.session(name)?;
        session.call_tool(tool, arguments).await
    }

    /// Call `tool` on connection `name` with an explicit deadline
    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        tool: &str,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<ToolCallResult> {
        let session = self.session(name)?;
        session.call_tool_with_timeout(tool, arguments, timeout).await
    }

    /// Call a tool on whichever ready connection advertises it
    pub async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> McpResult<ToolCallResult> {
        let owner = self.owner_of(tool).await?;
        tracing::debug!(tool, server = %owner, "Routing tool call");
        self.invoke(&owner, tool, arguments).await
    }

    /// Connection that owns `tool` in the merged catalog
    pub async fn owner_of(&self, tool: &str) -> McpResult<String> {
        self.list_operations()
            .await
            .owner(tool)
            .map(str::to_string)
            .ok_or_else(|| McpError::UnknownTool(tool.to_string()))
    }

    /// Close connection `name` and register a fresh one from its stored config
    pub async fn restart(&self, name: &str) -> McpResult<()> {
        let previous = self
            .write()
            .remove(name)
            .ok_or_else(|| McpError::UnknownConnection(name.to_string()))?;

        tracing::info!(server = %name, "Restarting MCP server");
        previous.session.close().await;
        self.register(name, previous.config).await
    }

    /// Close connection `name` and forget it
    pub async fn remove(&self, name: &str) -> McpResult<()> {
        let entry = self
            .write()
            .remove(name)
            .ok_or_else(|| McpError::UnknownConnection(name.to_string()))?;
        entry.session.close().await;
        Ok(())
    }

    /// Per-connection snapshot in name order
    pub fn status(&self) -> Vec<ConnectionStatus> {
        let mut status: Vec<_> = self
            .read()
            .values()
            .map(|entry| entry.session.status())
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Close every connection and terminate every server process. Idempotent.
    pub async fn shutdown(&self) {
        let entries: Vec<Registered> = self.write().drain().map(|(_, entry)| entry).collect();
        if entries.is_empty() {
            return;
        }

        tracing::info!("Shutting down {} MCP connection(s)", entries.len());
        join_all(entries.iter().map(|entry| entry.session.close())).await;
    }
}
