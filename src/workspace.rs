//! Shared directory layout both sides agree on out-of-band.
//!
//! The orchestrator owns the workspace: `source/` for materialized source
//! files, `compiled/` for produced artifacts, `logs/` and `temp/` for
//! scratch. The client never writes outside the two mailbox slot files at
//! the workspace root.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Default mailbox slot file names under the workspace root. A deployment
/// convention, not part of the wire contract; both sides must agree.
pub const DEFAULT_COMMAND_FILE: &str = "bridge_command.txt";
pub const DEFAULT_RESPONSE_FILE: &str = "bridge_response.txt";

/// A workspace rooted at a directory both processes can reach.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    command_file: String,
    response_file: String,
}

impl Workspace {
    /// Create all directory roles idempotently and return the workspace.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        Self::init_with_mailbox(root, DEFAULT_COMMAND_FILE, DEFAULT_RESPONSE_FILE)
    }

    /// Like [`Workspace::init`] with configured mailbox file names.
    pub fn init_with_mailbox(
        root: impl Into<PathBuf>,
        command_file: impl Into<String>,
        response_file: impl Into<String>,
    ) -> Result<Self> {
        let workspace = Self {
            root: root.into(),
            command_file: command_file.into(),
            response_file: response_file.into(),
        };
        for dir in [
            workspace.root.clone(),
            workspace.source_dir(),
            workspace.compiled_dir(),
            workspace.logs_dir(),
            workspace.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create workspace directory {}", dir.display()))?;
        }
        debug!(root = %workspace.root.display(), "Workspace initialized");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.root.join("compiled")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Well-known command slot path.
    pub fn command_path(&self) -> PathBuf {
        self.root.join(&self.command_file)
    }

    /// Well-known response slot path.
    pub fn response_path(&self) -> PathBuf {
        self.root.join(&self.response_file)
    }

    /// Delete files in `compiled/` and `temp/` older than `max_age`.
    ///
    /// Returns how many files were removed. Unreadable entries are logged
    /// and skipped rather than aborting the sweep.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        for dir in [self.compiled_dir(), self.temp_dir()] {
            removed += sweep_dir(&dir, max_age);
        }
        if removed > 0 {
            debug!(removed, "Cleaned up stale workspace files");
        }
        removed
    }
}

fn sweep_dir(dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Cannot read workspace directory");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        let Some(age) = age else { continue };
        if age > max_age {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove stale file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_all_roles() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(dir.path().join("bridge")).unwrap();

        assert!(workspace.source_dir().is_dir());
        assert!(workspace.compiled_dir().is_dir());
        assert!(workspace.logs_dir().is_dir());
        assert!(workspace.temp_dir().is_dir());
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::init(dir.path()).unwrap();
        Workspace::init(dir.path()).unwrap();
    }

    #[test]
    fn mailbox_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        assert_eq!(
            workspace.command_path(),
            dir.path().join(DEFAULT_COMMAND_FILE)
        );
        assert_eq!(
            workspace.response_path(),
            dir.path().join(DEFAULT_RESPONSE_FILE)
        );
    }

    #[test]
    fn custom_mailbox_names() {
        let dir = tempfile::tempdir().unwrap();
        let workspace =
            Workspace::init_with_mailbox(dir.path(), "cmd.txt", "resp.txt").unwrap();
        assert_eq!(workspace.command_path(), dir.path().join("cmd.txt"));
        assert_eq!(workspace.response_path(), dir.path().join("resp.txt"));
    }

    #[test]
    fn cleanup_removes_old_files_keeps_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();

        let old = workspace.compiled_dir().join("Old.jar");
        std::fs::write(&old, b"jar").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let fresh = workspace.temp_dir().join("Fresh.kt");
        std::fs::write(&fresh, b"fun main() {}").unwrap();

        let removed = workspace.cleanup_stale(Duration::from_millis(25));
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn cleanup_ignores_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        std::fs::remove_dir_all(workspace.temp_dir()).unwrap();
        // Must not panic or abort on the missing role.
        workspace.cleanup_stale(Duration::from_secs(0));
    }
}
