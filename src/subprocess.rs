//! Bounded subprocess execution.
//!
//! Spawns a command with piped stdout/stderr, reads both concurrently under
//! a hard wall-clock timeout, and kills the child when the budget expires.
//! The child is not moved into the reading future so it stays killable.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::BridgeError;

/// Captured result of a completed subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    /// Exit code (-1 when the process was terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run a command to completion within `budget`.
///
/// On timeout the child is killed and `SubprocessTimeout` is returned; the
/// caller never observes a half-finished exit status.
pub async fn run_with_timeout(
    mut command: Command,
    budget: Duration,
) -> Result<SubprocessOutput, BridgeError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = command.spawn()?;

    let mut child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("failed to open subprocess stdout"))?;
    let mut child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("failed to open subprocess stderr"))?;

    let read_all = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (r1, r2) = tokio::join!(
            child_stdout.read_to_end(&mut stdout_buf),
            child_stderr.read_to_end(&mut stderr_buf),
        );
        r1?;
        r2?;
        Ok::<_, std::io::Error>((stdout_buf, stderr_buf))
    };

    let (stdout_buf, stderr_buf) = match tokio::time::timeout(budget, read_all).await {
        Ok(read) => read?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(BridgeError::SubprocessTimeout(budget));
        }
    };

    let status = child.wait().await?;
    let output = SubprocessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        duration: started.elapsed(),
    };

    debug!(exit_code = output.exit_code, duration = ?output.duration, "Subprocess finished");
    Ok(output)
}
