use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("io error while running '{command}': {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ShellError>;

// ---------------------------------------------------------------------------
// Request / output
// ---------------------------------------------------------------------------

/// One command to run through the shell.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub command: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// What came back from the shell.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out
    }
}

// ---------------------------------------------------------------------------
// CommandSpawner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over shell execution so step logic can be tested without
/// touching the real system.
#[async_trait::async_trait]
pub trait CommandSpawner: Send + Sync {
    async fn run(&self, request: &ShellRequest) -> Result<ShellOutput>;
}

// ---------------------------------------------------------------------------
// TokioSpawner
// ---------------------------------------------------------------------------

/// Real spawner backed by `sh -c`.
///
/// Commands that overrun their timeout get SIGTERM, then SIGKILL once the
/// grace period passes without an exit.
pub struct TokioSpawner {
    grace_period: Duration,
}

impl TokioSpawner {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }
}

impl Default for TokioSpawner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl CommandSpawner for TokioSpawner {
    async fn run(&self, request: &ShellRequest) -> Result<ShellOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
            command: request.command.clone(),
            source,
        })?;

        // Drain pipes concurrently with waiting; a child that fills a pipe
        // would otherwise block forever.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_lines(stdout));
        let stderr_task = tokio::spawn(read_lines(stderr));

        let waited = tokio::time::timeout(request.timeout, child.wait()).await;

        let (status, timed_out) = match waited {
            Ok(status) => {
                let status = status.map_err(|source| ShellError::Io {
                    command: request.command.clone(),
                    source,
                })?;
                (Some(status), false)
            }
            Err(_) => {
                tracing::warn!(
                    command = %request.command,
                    timeout_secs = request.timeout.as_secs(),
                    "command timed out, terminating"
                );
                terminate(&mut child, self.grace_period).await;
                (None, true)
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let mut stderr = stderr_task.await.unwrap_or_default();

        let return_code = match status {
            Some(status) => status.code().unwrap_or(-1),
            None => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "command timed out after {}s",
                    request.timeout.as_secs()
                ));
                -1
            }
        };

        Ok(ShellOutput {
            return_code,
            stdout,
            stderr,
            timed_out,
        })
    }
}

async fn read_lines<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut lines = BufReader::new(pipe).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if !collected.is_empty() {
            collected.push('\n');
        }
        collected.push_str(&line);
    }
    collected
}

/// SIGTERM first, SIGKILL after the grace period.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    send_sigterm(child);
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    tracing::warn!("child ignored SIGTERM, killing");
    let _ = child.kill().await;
}

#[cfg(unix)]
fn send_sigterm(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: kill only delivers a signal; the pid came from a live child handle.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &tokio::process::Child) {}

// ---------------------------------------------------------------------------
// MockSpawner – canned outputs for tests
// ---------------------------------------------------------------------------

/// Test double that matches requests against canned responses and records
/// every command it saw.
#[derive(Default)]
pub struct MockSpawner {
    responses: std::sync::Mutex<Vec<(String, ShellOutput)>>,
    commands: std::sync::Mutex<Vec<String>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(needle: impl Into<String>, stdout: impl Into<String>) -> (String, ShellOutput) {
        (
            needle.into(),
            ShellOutput {
                return_code: 0,
                stdout: stdout.into(),
                stderr: String::new(),
                timed_out: false,
            },
        )
    }

    pub fn fail(needle: impl Into<String>, stderr: impl Into<String>) -> (String, ShellOutput) {
        (
            needle.into(),
            ShellOutput {
                return_code: 1,
                stdout: String::new(),
                stderr: stderr.into(),
                timed_out: false,
            },
        )
    }

    /// Build a mock from (needle, output) pairs. A command matches the first
    /// entry whose needle it contains; unmatched commands succeed with empty
    /// output.
    pub fn with(entries: impl IntoIterator<Item = (String, ShellOutput)>) -> Self {
        Self {
            responses: std::sync::Mutex::new(entries.into_iter().collect()),
            commands: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl CommandSpawner for MockSpawner {
    async fn run(&self, request: &ShellRequest) -> Result<ShellOutput> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.command.clone());
        let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        for (needle, output) in responses.iter() {
            if request.command.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(ShellOutput {
            return_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
