//! Single-slot file mailbox between the client and the desktop orchestrator.
//!
//! The shared filesystem stands in for a network socket: one well-known file
//! for the command, one for the response. File existence is the only
//! synchronization primitive — there is no locking across processes, and the
//! protocol relies on the single-outstanding-request invariant for ordering.
//! Reading a slot always deletes it (consume-once), so neither side can
//! process the same message twice.

pub mod codec;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::workspace::Workspace;

/// Attempts before a failing write-then-readback escalates to
/// `TransportUnavailable`.
const PUBLISH_ATTEMPTS: u32 = 3;

/// The two-file channel. Cheap to clone paths; each side constructs its own.
#[derive(Debug, Clone)]
pub struct Mailbox {
    command_path: PathBuf,
    response_path: PathBuf,
    poll_interval: Duration,
}

impl Mailbox {
    /// Create a mailbox over explicit file paths.
    ///
    /// `poll_interval` is injectable so tests can poll in milliseconds.
    pub fn new(
        command_path: impl Into<PathBuf>,
        response_path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            command_path: command_path.into(),
            response_path: response_path.into(),
            poll_interval,
        }
    }

    /// Create a mailbox over a workspace's well-known slot paths.
    pub fn for_workspace(workspace: &Workspace, poll_interval: Duration) -> Self {
        Self::new(
            workspace.command_path(),
            workspace.response_path(),
            poll_interval,
        )
    }

    pub fn command_path(&self) -> &Path {
        &self.command_path
    }

    pub fn response_path(&self) -> &Path {
        &self.response_path
    }

    /// Publish a command into the command slot (client side).
    pub async fn publish_command(&self, payload: &str) -> Result<(), BridgeError> {
        self.publish(&self.command_path, payload).await
    }

    /// Publish a response into the response slot (desktop side).
    pub async fn publish_response(&self, payload: &str) -> Result<(), BridgeError> {
        self.publish(&self.response_path, payload).await
    }

    /// Poll for the response slot until `timeout` elapses.
    ///
    /// On detection the file is read fully, deleted, and returned. Returns
    /// `Timeout` no earlier than the deadline and no more than one poll
    /// interval after it.
    pub async fn await_response(&self, timeout: Duration) -> Result<String, BridgeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.take(&self.response_path).await? {
                return Ok(payload);
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::Timeout(timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll step over the command slot (desktop side).
    ///
    /// If a command file exists it is read then deleted before this returns,
    /// so a slow orchestrator can never double-process the same command.
    pub async fn consume_command(&self) -> Result<Option<String>, BridgeError> {
        self.take(&self.command_path).await
    }

    /// Best-effort removal of both slots. Startup hygiene: a previous run may
    /// have left a command or response behind.
    pub async fn clear(&self) {
        for path in [&self.command_path, &self.response_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Cleared leftover mailbox file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not clear mailbox file"),
            }
        }
    }

    /// Write-then-verify-by-readback, retried a fixed number of times.
    ///
    /// The underlying transport can deliver partial writes; reading the slot
    /// back catches them before the other side does.
    async fn publish(&self, path: &Path, payload: &str) -> Result<(), BridgeError> {
        for attempt in 1..=PUBLISH_ATTEMPTS {
            if let Err(e) = tokio::fs::write(path, payload).await {
                warn!(path = %path.display(), attempt, error = %e, "Mailbox write failed");
                continue;
            }
            match tokio::fs::read_to_string(path).await {
                Ok(readback) if readback == payload => {
                    debug!(path = %path.display(), bytes = payload.len(), "Published");
                    return Ok(());
                }
                Ok(_) => {
                    warn!(path = %path.display(), attempt, "Readback mismatch, rewriting");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // The other side consumed the slot before verification
                    // could run. Rewriting now would duplicate the message.
                    debug!(path = %path.display(), "Slot consumed before readback");
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "Readback failed");
                }
            }
        }
        Err(BridgeError::TransportUnavailable(format!(
            "could not verify write to {} after {PUBLISH_ATTEMPTS} attempts",
            path.display()
        )))
    }

    /// Read-then-delete a slot. `None` when the slot is empty.
    async fn take(&self, path: &Path) -> Result<Option<String>, BridgeError> {
        let payload = match tokio::fs::read_to_string(path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BridgeError::TransportUnavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        if let Err(e) = tokio::fs::remove_file(path).await {
            // Deletion must happen before the payload is handed out, or the
            // same message could be processed twice.
            if path.exists() {
                return Err(BridgeError::TransportUnavailable(format!(
                    "cannot drain {}: {e}",
                    path.display()
                )));
            }
        }
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox_in(dir: &Path, poll_ms: u64) -> Mailbox {
        Mailbox::new(
            dir.join("bridge_command.txt"),
            dir.join("bridge_response.txt"),
            Duration::from_millis(poll_ms),
        )
    }

    #[tokio::test]
    async fn publish_then_consume_once() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = mailbox_in(dir.path(), 10);

        mailbox.publish_command("kind: ping\n").await.unwrap();
        let first = mailbox.consume_command().await.unwrap();
        assert_eq!(first.as_deref(), Some("kind: ping\n"));

        // Consume-once: the file was deleted before the first call returned.
        let second = mailbox.consume_command().await.unwrap();
        assert!(second.is_none());
        assert!(!mailbox.command_path().exists());
    }

    #[tokio::test]
    async fn await_response_returns_payload_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = mailbox_in(dir.path(), 5);

        let writer = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.publish_response("ok: true\n").await.unwrap();
        });

        let payload = mailbox
            .await_response(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(payload, "ok: true\n");
        assert!(!mailbox.response_path().exists());
    }

    #[tokio::test]
    async fn await_response_timeout_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let poll = Duration::from_millis(20);
        let budget = Duration::from_millis(100);
        let mailbox = Mailbox::new(
            dir.path().join("cmd"),
            dir.path().join("resp"),
            poll,
        );

        let started = std::time::Instant::now();
        let err = mailbox.await_response(budget).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BridgeError::Timeout(_)));
        // No earlier than the deadline, no more than one poll interval (plus
        // scheduling slack) after it.
        assert!(elapsed >= budget, "returned early: {elapsed:?}");
        assert!(
            elapsed < budget + poll + Duration::from_millis(100),
            "returned late: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn publish_overwrites_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = mailbox_in(dir.path(), 10);

        mailbox.publish_command("kind: ping\nissued_at: 1\n").await.unwrap();
        mailbox.publish_command("kind: ping\nissued_at: 2\n").await.unwrap();

        // Single-slot semantics: the channel never holds two generations.
        let payload = mailbox.consume_command().await.unwrap().unwrap();
        assert!(payload.contains("issued_at: 2"));
        assert!(mailbox.consume_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_to_unwritable_directory_fails() {
        let mailbox = Mailbox::new(
            "/nonexistent-bridge-dir/cmd",
            "/nonexistent-bridge-dir/resp",
            Duration::from_millis(10),
        );
        let err = mailbox.publish_command("kind: ping\n").await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn clear_removes_both_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = mailbox_in(dir.path(), 10);

        mailbox.publish_command("kind: ping\n").await.unwrap();
        mailbox.publish_response("ok: true\n").await.unwrap();
        mailbox.clear().await;

        assert!(!mailbox.command_path().exists());
        assert!(!mailbox.response_path().exists());
        // Idempotent on empty slots.
        mailbox.clear().await;
    }
}
