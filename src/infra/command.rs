//! Command runner
//!
//! Single entry point for spawning external programs:
//! - timeout control (the child is killed when it expires)
//! - optional line streaming into the tracing log
//! - stdout/stderr captured separately

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::CommandError;

/// Command runner
pub struct CommandRunner;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stderr, or stdout if stderr is empty
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl CommandRunner {
    /// Run a command to completion and capture its output
    pub async fn run_simple(
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => {
                result
                    .map(CommandOutput::from)
                    .map_err(|source| CommandError::SpawnFailed {
                        program: program.to_string(),
                        source,
                    })
            }
            _ = tokio::time::sleep(timeout) => {
                error!(program = program, "Command timed out after {:?}", timeout);
                Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Run a command, forwarding each output line to the debug log
    ///
    /// Used for long-running calls such as image builds.
    pub async fn run_with_streaming(
        program: &str,
        args: &[String],
        label: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let stdout_task = tokio::spawn(collect_lines(child.stdout.take(), label.to_string()));
        let stderr_task = tokio::spawn(collect_lines(child.stderr.take(), label.to_string()));

        let status = tokio::select! {
            status = child.wait() => status.map_err(CommandError::WaitFailed)?,
            _ = tokio::time::sleep(timeout) => {
                error!(program = program, label = label, "Command timed out after {:?}", timeout);
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

async fn collect_lines<R>(stream: Option<R>, label: String) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(stream) = stream else {
        return collected;
    };

    // Tool output is not always UTF-8; decode each line lossily instead of stopping
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(target: "linux_mirrors::command", "[{}] {}", label, line);
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                debug!(target: "linux_mirrors::command", "[{}] read error: {}", label, e);
                break;
            }
        }
    }
    collected
}
