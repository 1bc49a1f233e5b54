//! Local shell executor.

use async_trait::async_trait;
use shipyard_core::executor::{
    CommandRunner, CommandSpec, ExitStatus, LineSink, LogLine, LogStream,
};
use shipyard_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

/// Runs commands with `sh -c` on the worker itself.
#[derive(Debug, Clone, Default)]
pub struct LocalShellExecutor {
    shell: Option<String>,
}

impl LocalShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific shell binary instead of `sh`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: Some(shell.into()),
        }
    }

    fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }
}

#[async_trait]
impl CommandRunner for LocalShellExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: &CommandSpec, on_line: LineSink<'_>) -> Result<ExitStatus> {
        info!(command = %spec.command, cwd = %spec.cwd.display(), "Running command");

        let mut child = Command::new(self.shell())
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Build(format!("failed to spawn `{}`: {}", spec.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let out = LinesStream::new(BufReader::new(stdout).lines()).map(|l| (LogStream::Stdout, l));
        let err = LinesStream::new(BufReader::new(stderr).lines()).map(|l| (LogStream::Stderr, l));
        let mut merged = out.merge(err);

        let drive = async {
            while let Some((stream, line)) = merged.next().await {
                match line {
                    Ok(content) => on_line(LogLine::new(stream, content)),
                    Err(e) => warn!(error = %e, "Output stream error"),
                }
            }
            child.wait().await
        };

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, drive).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(command = %spec.command, timeout = ?limit, "Command timed out");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed out command");
                    }
                    on_line(LogLine::new(
                        LogStream::System,
                        format!("command timed out after {}s", limit.as_secs()),
                    ));
                    return Err(Error::Timeout(format!(
                        "`{}` exceeded {}s",
                        spec.command,
                        limit.as_secs()
                    )));
                }
            },
            None => drive.await,
        };

        let status = waited.map_err(|e| Error::Internal(format!("failed to wait on child: {e}")))?;
        debug!(command = %spec.command, code = ?status.code(), "Command finished");

        Ok(ExitStatus {
            code: status.code(),
        })
    }
}
