#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXEC_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    /// Cap per captured stream.
    pub max_output_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_EXEC_TIMEOUT_MS),
            max_output_bytes: DEFAULT_EXEC_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecExit {
    Success,
    ExitCode(i32),
    Signal,
    TimedOut,
    OutputOverflow,
    SpawnFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExecExit,
}

impl ExecOutcome {
    fn spawn_failed(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit: ExecExit::SpawnFailed(message),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit == ExecExit::Success
    }

    /// Captured stdout followed by captured stderr.
    pub fn merged_output(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    /// Human-readable reason the run counts as failed; `None` on success.
    pub fn failure_message(&self, limits: &ExecLimits) -> Option<String> {
        match &self.exit {
            ExecExit::Success => None,
            ExecExit::ExitCode(code) => Some(format!("Command exited with code {code}")),
            ExecExit::Signal => Some("Command terminated by signal".to_string()),
            ExecExit::TimedOut => Some(format!(
                "Command timed out after {} ms",
                limits.timeout.as_millis()
            )),
            ExecExit::OutputOverflow => Some(format!(
                "Command output exceeded {} bytes",
                limits.max_output_bytes
            )),
            ExecExit::SpawnFailed(err) => Some(format!("Failed to start command: {err}")),
        }
    }
}

/// Runs one approved command to completion under the given limits.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str, limits: &ExecLimits) -> ExecOutcome;
}

/// Executes commands through `sh -c`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShellExecutor;

enum Stop {
    Overflow,
    Io(std::io::Error),
}

async fn read_capped<R>(reader: Option<R>, cap: usize, buf: &mut Vec<u8>) -> Result<(), Stop>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await.map_err(Stop::Io)?;
        if n == 0 {
            return Ok(());
        }
        let room = cap.saturating_sub(buf.len());
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            return Err(Stop::Overflow);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::debug!(pid, error = %err, "killpg failed");
        }
    }
    if let Err(err) = child.kill().await {
        tracing::debug!(error = %err, "kill failed");
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str, limits: &ExecLimits) -> ExecOutcome {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ExecOutcome::spawn_failed(err.to_string()),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = limits.max_output_bytes;

        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let finished = tokio::time::timeout(limits.timeout, async {
            tokio::try_join!(
                read_capped(stdout, cap, &mut out_buf),
                read_capped(stderr, cap, &mut err_buf),
            )?;
            let status = child.wait().await.map_err(Stop::Io)?;
            Ok::<_, Stop>(status)
        })
        .await;

        let exit = match finished {
            Ok(Ok(status)) if status.success() => ExecExit::Success,
            Ok(Ok(status)) => match status.code() {
                Some(code) => ExecExit::ExitCode(code),
                None => ExecExit::Signal,
            },
            Ok(Err(Stop::Overflow)) => {
                kill_tree(&mut child).await;
                ExecExit::OutputOverflow
            }
            Ok(Err(Stop::Io(err))) => {
                kill_tree(&mut child).await;
                ExecExit::SpawnFailed(err.to_string())
            }
            Err(_elapsed) => {
                kill_tree(&mut child).await;
                ExecExit::TimedOut
            }
        };

        ExecOutcome {
            stdout: String::from_utf8_lossy(&out_buf).into_owned(),
            stderr: String::from_utf8_lossy(&err_buf).into_owned(),
            exit,
        }
    }
}
