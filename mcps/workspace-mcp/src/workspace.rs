//! Workspace directory and the operations allowed inside it

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;

/// Environment variable naming the workspace directory
pub const WORKSPACE_DIR_ENV: &str = "WORKSPACE_DIR";

/// Used when `WORKSPACE_DIR` is unset
pub const DEFAULT_WORKSPACE_DIR: &str = "workspace";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid path '{0}': must be relative and stay inside the workspace")]
    InvalidPath(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// A directory all tool paths are resolved against
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Use `root` as the workspace, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> WorkspaceResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| WorkspaceError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Workspace from `WORKSPACE_DIR`, or `./workspace`
    pub fn from_env() -> WorkspaceResult<Self> {
        let dir = std::env::var(WORKSPACE_DIR_ENV).unwrap_or_else(|_| DEFAULT_WORKSPACE_DIR.to_string());
        Self::open(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative tool path into the workspace.
    ///
    /// Rejects absolute paths, `..` components, NUL bytes and symlinks that
    /// lead outside the root.
    pub fn resolve(&self, relative: &str) -> WorkspaceResult<PathBuf> {
        if relative.is_empty() || relative.contains('\0') {
            return Err(WorkspaceError::InvalidPath(relative.to_string()));
        }

        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::InvalidPath(relative.to_string()))
                }
            }
        }

        if resolved == self.root {
            return Err(WorkspaceError::InvalidPath(relative.to_string()));
        }
        self.ensure_inside(relative, &resolved)?;
        Ok(resolved)
    }

    /// Canonicalize the deepest existing ancestor of `resolved` and check it
    /// is still under the root. Dangling symlinks are rejected outright.
    fn ensure_inside(&self, relative: &str, resolved: &Path) -> WorkspaceResult<()> {
        let invalid = || WorkspaceError::InvalidPath(relative.to_string());

        for ancestor in resolved.ancestors() {
            match ancestor.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => return Err(invalid()),
                Err(_) if ancestor.symlink_metadata().is_ok() => return Err(invalid()),
                Err(_) => continue,
            }
        }
        Err(invalid())
    }

    /// Write `content` to `filename`, creating parent directories
    pub async fn create_file(&self, filename: &str, content: &str) -> WorkspaceResult<PathBuf> {
        let path = self.resolve(filename)?;
        let io_err = |source| WorkspaceError::Io {
            path: filename.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        fs::write(&path, content).await.map_err(io_err)?;

        tracing::debug!("Created {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    pub async fn read_file(&self, filename: &str) -> WorkspaceResult<String> {
        let path = self.resolve(filename)?;
        fs::read_to_string(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                WorkspaceError::NotFound(filename.to_string())
            } else {
                WorkspaceError::Io {
                    path: filename.to_string(),
                    source,
                }
            }
        })
    }

    /// Every file under the workspace, relative and sorted. `.git` is skipped.
    pub async fn list_files(&self) -> WorkspaceResult<Vec<String>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let io_err = |source| WorkspaceError::Io {
                path: dir.display().to_string(),
                source,
            };
            let mut entries = fs::read_dir(&dir).await.map_err(io_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
                let path = entry.path();
                if entry.file_name() == ".git" {
                    continue;
                }
                let file_type = entry.file_type().await.map_err(io_err)?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    files.push(relative.to_string_lossy().into_owned());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Run `git <args>` inside the workspace and return its trimmed stdout
    pub async fn git(&self, args: &[&str]) -> WorkspaceResult<String> {
        let command = args.join(" ");
        tracing::debug!("Running git {}", command);

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|source| WorkspaceError::Io {
                path: "git".to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(WorkspaceError::Git {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
