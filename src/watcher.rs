//! Supplementary mirror-anomaly watcher.
//!
//! This is not load-bearing: [`crate::workdir::MirrorHandle`] always
//! re-derives pending local changes from the adapter at the top of every
//! pull/push, regardless of whether this watcher observed anything. It
//! exists purely so an operator running the daemon can see, in real time,
//! who is touching a mirror between cycles.

use anyhow::{Context as _, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, FileIdMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::time::Duration;
use tokio::sync::broadcast;

/// One observed change to a file inside a mirror.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: std::time::SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Watches one mirror's working directory and reports changes on a
/// broadcast channel for operator-facing logging.
pub struct MirrorWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    _event_tx: Sender<DebounceEventResult>,
}

impl MirrorWatcher {
    pub fn new() -> Result<(Self, broadcast::Receiver<FileChange>)> {
        let (event_tx, _event_rx) = channel();
        let (change_tx, change_rx) = broadcast::channel(256);

        let tx_clone = change_tx.clone();
        let debouncer = new_debouncer(
            Duration::from_millis(200),
            None,
            move |result: DebounceEventResult| {
                if let Ok(events) = result {
                    for debounced_event in events {
                        if let Some(change) = Self::debounced_event_to_change(debounced_event) {
                            let _ = tx_clone.send(change);
                        }
                    }
                }
            },
        )?;

        Ok((
            Self {
                debouncer: Some(debouncer),
                _event_tx: event_tx,
            },
            change_rx,
        ))
    }

    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(debouncer) = &mut self.debouncer {
            debouncer
                .watch(path.as_ref(), RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch mirror: {}", path.as_ref().display()))?;
            tracing::info!(path = %path.as_ref().display(), "watching mirror for out-of-band changes");
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.debouncer = None;
    }

    fn debounced_event_to_change(debounced_event: DebouncedEvent) -> Option<FileChange> {
        let event = &debounced_event.event;
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => return None,
        };
        let path = event.paths.first()?.clone();
        if Self::is_metadata_path(&path) {
            return None;
        }
        Some(FileChange {
            path,
            kind,
            timestamp: std::time::SystemTime::now(),
        })
    }

    /// The engine's own metadata writes (basefiles, project.json) are
    /// expected churn, not an anomaly — don't report them.
    fn is_metadata_path(path: &Path) -> bool {
        path.components()
            .any(|c| c.as_os_str() == ".dbsync-meta" || c.as_os_str() == ".mergin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn detects_changes_outside_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.gpkg");

        let (mut watcher, mut rx) = MirrorWatcher::new().unwrap();
        watcher.watch(temp_dir.path()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&test_file, b"bytes").await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        if let Ok(change) = rx.try_recv() {
            assert!(matches!(change.kind, ChangeKind::Created | ChangeKind::Modified));
        }

        watcher.stop();
    }
}
