//! Process launcher for stdio MCP servers
//!
//! Spawns a server with piped stdin/stdout, exposes them as line-oriented
//! reader/writer halves and owns the child process until it is terminated.
//! Server stderr is forwarded to tracing.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use super::error::{McpError, McpResult};
use crate::config::McpServerConfig;

/// Default grace period between SIGTERM and SIGKILL
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outcome of a single [`LineReader::read_line`]
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// The stream closed (process exited or closed stdout)
    Eof,
    /// The caller-supplied deadline elapsed before a full line arrived
    DeadlineElapsed,
}

/// Line-oriented view of a server's stdout
pub struct LineReader {
    server: String,
    inner: BufReader<BoxedReader>,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(server: &str, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            server: server.to_string(),
            inner: BufReader::new(Box::new(reader)),
            buf: Vec::new(),
        }
    }

    /// Read the next full line without its terminator.
    ///
    /// Partial data survives an elapsed deadline and is completed by the
    /// next call.
    pub async fn read_line(&mut self, deadline: Option<Duration>) -> McpResult<LineEvent> {
        let read = self.inner.read_until(b'\n', &mut self.buf);
        let n = match deadline {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => return Ok(LineEvent::DeadlineElapsed),
            },
            None => read.await,
        }
        .map_err(|e| McpError::transport(&self.server, format!("read failed: {}", e)))?;

        if n == 0 && self.buf.is_empty() {
            return Ok(LineEvent::Eof);
        }

        let mut bytes = std::mem::take(&mut self.buf);
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map(LineEvent::Line)
            .map_err(|_| McpError::protocol(&self.server, "server sent a line that is not UTF-8"))
    }
}

/// Line-oriented view of a server's stdin
pub struct LineWriter {
    server: String,
    inner: BoxedWriter,
}

impl LineWriter {
    pub fn new(server: &str, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            server: server.to_string(),
            inner: Box::new(writer),
        }
    }

    /// Write `line` followed by a newline and flush
    pub async fn write_line(&mut self, line: &str) -> McpResult<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        self.inner
            .write_all(&bytes)
            .await
            .map_err(|e| McpError::transport(&self.server, format!("write failed: {}", e)))?;
        self.inner
            .flush()
            .await
            .map_err(|e| McpError::transport(&self.server, format!("flush failed: {}", e)))
    }

    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// Owner of a spawned server process
pub struct ProcessHandle {
    server: String,
    child: Child,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has already exited
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_status = Some(status);
            }
        }
        self.exit_status
    }

    /// Ask the process to exit, killing it after `grace`.
    ///
    /// Safe to call repeatedly; later calls return the recorded status.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_exit_status() {
            return Some(status);
        }

        tracing::debug!(server = %self.server, pid = ?self.pid, "Terminating MCP server");

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let _ = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        }
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(result) => result.ok(),
            Err(_) => {
                tracing::warn!(
                    server = %self.server,
                    "MCP server did not exit within {:?}, killing",
                    grace
                );
                let _ = self.child.kill().await;
                self.child.wait().await.ok()
            }
        };

        self.exit_status = status;
        status
    }
}

/// A freshly spawned server: process handle plus its stdio halves
pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub reader: LineReader,
    pub writer: LineWriter,
}

/// Spawns MCP server processes
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Start `config.command` with piped stdio.
    ///
    /// Must be called inside a tokio runtime (stderr is drained by a task).
    pub fn spawn(name: &str, config: &McpServerConfig) -> McpResult<LaunchedProcess> {
        let mut cmd = Command::new(&config.command);
        if !config.args.is_empty() {
            cmd.args(&config.args);
        }
        for (key, value) in &config.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let launch_error = |reason: String| McpError::Launch {
            server: name.to_string(),
            command: config.command.clone(),
            reason,
        };

        let mut child = cmd.spawn().map_err(|e| launch_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        let pid = child.id();
        tracing::info!(server = %name, pid = ?pid, command = %config.command, "Spawned MCP server");

        Ok(LaunchedProcess {
            handle: ProcessHandle {
                server: name.to_string(),
                child,
                pid,
                exit_status: None,
            },
            reader: LineReader::new(name, stdout),
            writer: LineWriter::new(name, stdin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader_splits_and_reports_eof() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new("t", rx);

        tx.write_all(b"first\r\nsec").await.unwrap();
        assert_eq!(
            reader.read_line(None).await.unwrap(),
            LineEvent::Line("first".into())
        );

        // Partial line: deadline elapses, data is kept for the next call
        assert_eq!(
            reader.read_line(Some(Duration::from_millis(20))).await.unwrap(),
            LineEvent::DeadlineElapsed
        );
        tx.write_all(b"ond\n").await.unwrap();
        assert_eq!(
            reader.read_line(None).await.unwrap(),
            LineEvent::Line("second".into())
        );

        drop(tx);
        assert_eq!(reader.read_line(None).await.unwrap(), LineEvent::Eof);
    }

    #[tokio::test]
    async fn test_line_writer_appends_newline() {
        let (tx, rx) = tokio::io::duplex(64);
        let mut writer = LineWriter::new("t", tx);
        let mut reader = LineReader::new("t", rx);

        writer.write_line(r#"{"a":1}"#).await.unwrap();
        assert_eq!(
            reader.read_line(None).await.unwrap(),
            LineEvent::Line(r#"{"a":1}"#.into())
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_is_launch_error() {
        let config = McpServerConfig::new("/definitely/not/a/real/mcp-server", Vec::<String>::new());
        let err = ProcessLauncher::spawn("ghost", &config).err().unwrap();
        assert!(matches!(err, McpError::Launch { ref server, .. } if server == "ghost"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_is_observed_as_eof() {
        let config = McpServerConfig::new("sh", ["-c", "echo hello; exit 3"]);
        let mut launched = ProcessLauncher::spawn("short", &config).unwrap();

        assert_eq!(
            launched.reader.read_line(None).await.unwrap(),
            LineEvent::Line("hello".into())
        );
        assert_eq!(launched.reader.read_line(None).await.unwrap(), LineEvent::Eof);

        let status = launched.handle.terminate(DEFAULT_SHUTDOWN_GRACE).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let config = McpServerConfig::new("sh", ["-c", "while read -r l; do :; done"]);
        let mut launched = ProcessLauncher::spawn("idle", &config).unwrap();

        let first = launched.handle.terminate(Duration::from_secs(2)).await;
        assert!(first.is_some());
        let second = launched.handle.terminate(Duration::from_secs(2)).await;
        assert_eq!(first, second);
        assert_eq!(launched.reader.read_line(None).await.unwrap(), LineEvent::Eof);
    }
}
