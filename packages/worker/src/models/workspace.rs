use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hands out exclusive working directories and deletes them off the
/// judging path once they are dropped.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    cleanup_tx: mpsc::UnboundedSender<PathBuf>,
}

impl WorkspaceManager {
    /// Start the cleanup task. Must be called from within a Tokio runtime.
    pub fn start(root: impl Into<PathBuf>, cleanup_attempts: u32) -> (Self, JoinHandle<()>) {
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_cleanup(cleanup_rx, cleanup_attempts.max(1)));
        (
            Self {
                root: root.into(),
                cleanup_tx,
            },
            handle,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `<root>/<prefix>-<uuid>`.
    pub async fn allocate(&self, prefix: &str) -> io::Result<Workspace> {
        let path = self.root.join(format!("{}-{}", prefix, Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Allocated workspace");
        Ok(Workspace {
            path,
            cleanup_tx: self.cleanup_tx.clone(),
        })
    }
}

/// An exclusive directory, deleted asynchronously on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    cleanup_tx: mpsc::UnboundedSender<PathBuf>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        if let Err(e) = self.cleanup_tx.send(path) {
            warn!(path = %e.0.display(), "Cleanup task stopped, workspace left behind");
        }
    }
}

async fn run_cleanup(mut rx: mpsc::UnboundedReceiver<PathBuf>, attempts: u32) {
    while let Some(path) = rx.recv().await {
        for attempt in 1..=attempts {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) if attempt == attempts => {
                    warn!(
                        path = %path.display(),
                        attempts,
                        error = %e,
                        "Failed to delete workspace"
                    );
                }
                Err(e) => {
                    debug!(path = %path.display(), attempt, error = %e, "Workspace delete failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
            }
        }
    }
}
