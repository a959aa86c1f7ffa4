//! E2E test: drive workspace-mcp through the orchestrator

use std::path::{Path, PathBuf};

use mcp_hub::config::McpServerConfig;
use mcp_hub::mcp::{ConnectionState, Orchestrator};

/// Get the workspace root directory (contains target/ and Cargo.toml with [workspace])
fn workspace_root() -> PathBuf {
    let mut current = std::env::current_dir().expect("Failed to get cwd");

    loop {
        let has_target = current.join("target").is_dir();
        let has_cargo = current.join("Cargo.toml").exists();
        let has_hub_subdir = current.join("hub").is_dir();

        if has_target && has_cargo && has_hub_subdir {
            return current;
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    std::env::current_dir().expect("Failed to get cwd")
}

fn worker_binary() -> PathBuf {
    let root = workspace_root();
    let debug = root.join("target/debug/workspace-mcp");
    if debug.exists() {
        debug
    } else {
        root.join("target/release/workspace-mcp")
    }
}

fn worker_config(dir: &Path) -> McpServerConfig {
    McpServerConfig::new(worker_binary().display().to_string(), Vec::<String>::new())
        .with_env("WORKSPACE_DIR", dir.display().to_string())
        .with_env("GIT_AUTHOR_NAME", "hub-e2e")
        .with_env("GIT_AUTHOR_EMAIL", "hub-e2e@localhost")
        .with_env("GIT_COMMITTER_NAME", "hub-e2e")
        .with_env("GIT_COMMITTER_EMAIL", "hub-e2e@localhost")
}

#[tokio::test]
#[ignore = "requires workspace-mcp binary (cargo build --workspace)"]
async fn test_catalog_lists_workspace_tools() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orch = Orchestrator::new();
    orch.register("workspace", worker_config(dir.path()))
        .await
        .expect("Failed to register workspace-mcp");
    assert_eq!(orch.state("workspace").unwrap(), ConnectionState::Ready);

    let catalog = orch.list_operations().await;
    for name in [
        "create_file",
        "read_file",
        "list_files",
        "git_init",
        "git_add",
        "git_commit",
        "git_status",
    ] {
        assert_eq!(catalog.owner(name), Some("workspace"), "missing tool {}", name);
    }
    let create = catalog.get("create_file").unwrap();
    assert!(create.input_schema.is_some());

    orch.shutdown().await;
}

#[tokio::test]
#[ignore = "requires workspace-mcp binary and git"]
async fn test_file_and_git_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orch = Orchestrator::new();
    orch.register("workspace", worker_config(dir.path()))
        .await
        .expect("Failed to register workspace-mcp");

    let created = orch
        .call_tool(
            "create_file",
            Some(serde_json::json!({"filename": "hello.txt", "content": "hi there"})),
        )
        .await
        .expect("create_file failed");
    assert!(!created.is_error, "{}", created.text());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
        "hi there"
    );

    let read = orch
        .invoke(
            "workspace",
            "read_file",
            Some(serde_json::json!({"filename": "hello.txt"})),
        )
        .await
        .unwrap();
    assert_eq!(read.text(), "hi there");

    // Escaping the workspace is a tool error, not a connection failure
    let escaped = orch
        .invoke(
            "workspace",
            "read_file",
            Some(serde_json::json!({"filename": "../outside.txt"})),
        )
        .await
        .unwrap();
    assert!(escaped.is_error);
    assert_eq!(orch.state("workspace").unwrap(), ConnectionState::Ready);

    for tool in ["git_init", "git_add"] {
        let result = orch.invoke("workspace", tool, None).await.unwrap();
        assert!(!result.is_error, "{}: {}", tool, result.text());
    }
    let commit = orch
        .invoke(
            "workspace",
            "git_commit",
            Some(serde_json::json!({"message": "Add hello"})),
        )
        .await
        .unwrap();
    assert!(!commit.is_error, "{}", commit.text());

    let status = orch.invoke("workspace", "git_status", None).await.unwrap();
    assert!(!status.text().contains("hello.txt"), "{}", status.text());

    orch.shutdown().await;
}
