//! External tool execution.
//!
//! Every stage talks to the outside world through [`ToolRunner`]. The real
//! implementation, [`ProcessRunner`], spawns the tool with an explicit working
//! directory, captures both output streams, enforces the per-operation timeout
//! and kills the child when the run is cancelled.

use crate::error::ToolError;
use futures::future::BoxFuture;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

/// What an invocation is for. Lets test runners script outcomes per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolOperation {
    Version,
    Build,
    BuildFilesystem,
    Erase,
    UploadFirmware,
    WriteFlash,
}

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub operation: ToolOperation,
    pub program: String,
    pub args: Vec<String>,
    /// Scoped to this call; the process-wide directory is never changed
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Command line as an operator would type it.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_arg(&self.program));
        parts.extend(self.args.iter().map(|a| quote_arg(a)));
        parts.join(" ")
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Exit status and captured streams of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// "exited with code N" / "was terminated by a signal"
    pub fn describe_exit(&self) -> String {
        match self.code {
            Some(code) => format!("exited with code {}", code),
            None => "was terminated by a signal".to_string(),
        }
    }
}

/// Seam between the pipeline and the external toolchain.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>>;

    /// Whether the operator has asked the run to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Runs tools as child processes.
pub struct ProcessRunner {
    cancel_rx: watch::Receiver<bool>,
}

impl ProcessRunner {
    /// `cancel_rx` flipping to `true` kills the running child.
    pub fn new(cancel_rx: watch::Receiver<bool>) -> Self {
        ProcessRunner { cancel_rx }
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolOutput, ToolError> {
        let program = invocation.program.clone();

        if *self.cancel_rx.borrow() {
            return Err(ToolError::Cancelled { program });
        }

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.working_dir {
            if !dir.is_dir() {
                return Err(ToolError::Spawn {
                    program,
                    reason: format!("working directory {} does not exist", dir.display()),
                });
            }
            command.current_dir(dir);
        }

        log::debug!("[Executor] Running: {}", invocation.display());

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound {
                    program: program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: program.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = async move {
            let signalled = cancel_rx.wait_for(|c| *c).await.is_ok();
            // A dropped sender means cancellation can no longer happen
            if !signalled {
                futures::future::pending::<()>().await;
            }
        };

        // Dropping the wait future drops the child, and kill_on_drop kills it
        let output = tokio::select! {
            result = tokio::time::timeout(invocation.timeout, child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        return Err(ToolError::Spawn {
                            program,
                            reason: e.to_string(),
                        })
                    }
                    Err(_) => {
                        log::warn!(
                            "[Executor] {} timed out after {}s, killed",
                            program,
                            invocation.timeout.as_secs()
                        );
                        return Err(ToolError::TimedOut {
                            program,
                            after: invocation.timeout,
                        });
                    }
                }
            }
            _ = cancelled => {
                log::warn!("[Executor] {} cancelled, killed", program);
                return Err(ToolError::Cancelled { program });
            }
        };

        let result = ToolOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        log::debug!("[Executor] {} {}", program, result.describe_exit());
        if !result.stdout.trim().is_empty() {
            log::debug!("[Executor] {} stdout:\n{}", program, result.stdout.trim_end());
        }
        if !result.stderr.trim().is_empty() {
            log::debug!("[Executor] {} stderr:\n{}", program, result.stderr.trim_end());
        }

        Ok(result)
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(self.execute(invocation))
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}
