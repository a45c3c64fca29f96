//! Component D — the working-directory manager.
//!
//! Owns path resolution under `working_dir/<project_name>/…`, the
//! completeness check, and reverting unexpected local edits before every
//! pull/push. Detection is delegated to the adapter's `get_push_changes`
//! — authoritative because it compares against the adapter's own
//! manifest — rather than re-derived from the supplementary
//! `MirrorWatcher` in [`crate::watcher`], which exists only for live,
//! between-cycle anomaly logging and is never load-bearing for this.

use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::store::{FileChanges, ProjectStore};

/// One cached handle per working path, so the adapter doesn't re-derive
/// its own state on every pull/push call within a cycle. Invalidated by
/// dropping and re-resolving (e.g. after a redownload).
pub struct MirrorHandle {
    pub project_name: String,
    pub root: PathBuf,
    pub sync_file: PathBuf,
}

impl MirrorHandle {
    pub fn resolve(working_dir: &Path, project_name: &str, sync_file: &str) -> Self {
        let root = working_dir.join(project_name);
        Self {
            project_name: project_name.to_string(),
            sync_file: root.join(sync_file),
            root,
        }
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    /// A mirror "looks complete" when both the hidden metadata subtree and
    /// the configured sync_file are present.
    pub async fn looks_complete(&self, store: &dyn ProjectStore) -> bool {
        let meta = store.metadata_dir(&self.root);
        tokio::fs::try_exists(&meta).await.unwrap_or(false)
            && tokio::fs::try_exists(&self.sync_file).await.unwrap_or(false)
    }

    pub fn basefile_path(&self, store: &dyn ProjectStore, sync_file_rel: &str) -> PathBuf {
        store.metadata_dir(&self.root).join(sync_file_rel)
    }

    pub async fn require_working_dir(&self) -> Result<(), EngineError> {
        if !self.root.exists() {
            return Err(EngineError::state(
                &self.project_name,
                format!("the project working directory does not exist: {}", self.root.display()),
            ));
        }
        Ok(())
    }

    /// Checks both presence and basic integrity: a half-downloaded or
    /// disk-full-truncated GPKG "exists" but fails to open as a SQLite
    /// database, and geodiff's own error for that case is an opaque
    /// non-zero exit rather than a diagnosable message.
    pub async fn require_sync_file(&self) -> Result<(), EngineError> {
        if !self.sync_file.exists() {
            return Err(EngineError::state(
                &self.project_name,
                format!("the output GPKG file does not exist: {}", self.sync_file.display()),
            ));
        }
        let path = self.sync_file.clone();
        tokio::task::spawn_blocking(move || crate::gpkg::sanity_check(&path))
            .await
            .map_err(|e| EngineError::state(&self.project_name, format!("GeoPackage sanity check task panicked: {e}")))??;
        Ok(())
    }

    /// Computes `push_changes` and, if non-empty, reverts them: added files
    /// are deleted, updated/removed files are restored from the basefile
    /// (if the sync file) or redownloaded otherwise. Returns the leftover
    /// changes after revert — callers treat any leftover as a hard error.
    pub async fn revert_pending_local_changes(
        &self,
        store: &dyn ProjectStore,
        sync_file_rel: &str,
        mirror_version: &str,
    ) -> Result<FileChanges, EngineError> {
        let changes = store.get_push_changes(&self.root).await?;
        if changes.is_empty() {
            return Ok(changes);
        }

        tracing::debug!(project = %self.project_name, ?changes, "reverting local changes");

        for added in &changes.added {
            let path = self.root.join(&added.path);
            let _ = tokio::fs::remove_file(&path).await;
        }

        for changed in changes.updated.iter().chain(changes.removed.iter()) {
            let path = self.root.join(&changed.path);
            let is_sync_file = changed.path.to_lowercase().ends_with(".gpkg")
                || changed.path == sync_file_rel;

            if is_sync_file {
                let base = self.basefile_path(store, &changed.path);
                let _ = tokio::fs::remove_file(&path).await;
                if let Err(e) = tokio::fs::copy(&base, &path).await {
                    return Err(EngineError::state(
                        &self.project_name,
                        format!("failed to restore {} from basefile: {e}", changed.path),
                    ));
                }
            } else {
                let _ = tokio::fs::remove_file(&path).await;
                store
                    .download_file(&self.root, &changed.path, &path, mirror_version)
                    .await?;
                // Keep the basefile in step with what was just restored,
                // otherwise get_push_changes would see the same file as
                // "updated" again on the very next check and revert would
                // never converge.
                let base = self.basefile_path(store, &changed.path);
                if let Some(parent) = base.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                let _ = tokio::fs::copy(&path, &base).await;
            }
        }

        let leftovers = store.get_push_changes(&self.root).await?;
        tracing::debug!(project = %self.project_name, ?leftovers, "leftover changes after revert");
        Ok(leftovers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_paths_under_working_dir() {
        let handle = MirrorHandle::resolve(Path::new("/tmp/dbsync"), "myproj", "data.gpkg");
        assert_eq!(handle.root, PathBuf::from("/tmp/dbsync/myproj"));
        assert_eq!(handle.sync_file, PathBuf::from("/tmp/dbsync/myproj/data.gpkg"));
    }
}
