// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Step executors.
//!
//! [`ShellStepExecutor`] runs each step's command through `sh -c` and streams
//! stdout and stderr into the transaction log line by line.
//! [`DryRunStepExecutor`] only records what would have run.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::plan::Step;
use crate::domain::runtime::{LogSink, StepError, StepExecutor};

/// Records each command without running it
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunStepExecutor;

impl DryRunStepExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for DryRunStepExecutor {
    async fn execute(&self, step: &Step, output: &dyn LogSink) -> Result<(), StepError> {
        output.line(format!("[dry-run] {}", step.command)).await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ShellStepExecutor {
    shell: String,
}

impl ShellStepExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellStepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies `reader` into the log until EOF. Output that is not UTF-8 is
/// decoded lossily; the pipe is always drained so the child never sees EPIPE.
async fn forward<R>(reader: R, output: &dyn LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                output.line(String::from_utf8_lossy(&buf).into_owned()).await;
            }
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    warn!("Failed to drain command output: {}", e);
                }
                break;
            }
        }
    }
}

#[async_trait]
impl StepExecutor for ShellStepExecutor {
    async fn execute(&self, step: &Step, output: &dyn LogSink) -> Result<(), StepError> {
        debug!(step_id = %step.id, command = %step.command, "Running step");

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&step.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StepError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| StepError::Spawn("stderr not captured".to_string()))?;

        tokio::join!(forward(stdout, output), forward(stderr, output));

        let status = child
            .wait()
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(StepError::ExitStatus(code)),
            None => Err(StepError::Terminated),
        }
    }
}
