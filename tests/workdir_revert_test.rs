//! Exercises [`dbsync::workdir::MirrorHandle::revert_pending_local_changes`]
//! — a mirror on disk must have no pending local file changes at rest —
//! against a small in-process fake [`ProjectStore`], testing
//! storage-adjacent logic against a fake backend rather than a live
//! server.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dbsync::error::EngineError;
use dbsync::store::{FileChanges, FileEntry, ProjectInfo, ProjectStore, Session};
use dbsync::workdir::MirrorHandle;

const META_DIR: &str = ".basefiles";

/// A fake project store backed entirely by the filesystem: "remote" files
/// for a given version live in `remote_root/<version>/...`, and
/// `download_file` just copies from there. `local_version`/
/// `local_project_id` read a tiny sidecar file dropped by the test setup.
struct FakeStore {
    remote_root: PathBuf,
    project_id: uuid::Uuid,
}

impl FakeStore {
    fn new(remote_root: PathBuf) -> Self {
        Self {
            remote_root,
            project_id: uuid::Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl ProjectStore for FakeStore {
    async fn login(&self, _url: &str, _user: &str, _pass: &str) -> Result<Session, EngineError> {
        unimplemented!("not exercised by this test")
    }

    async fn download_project(&self, _project_ref: &str, _dir: &Path, _version: Option<&str>) -> Result<(), EngineError> {
        unimplemented!("not exercised by this test")
    }

    async fn pull_project(&self, _dir: &Path) -> Result<(), EngineError> {
        unimplemented!("not exercised by this test")
    }

    async fn push_project(&self, _dir: &Path) -> Result<(), EngineError> {
        unimplemented!("not exercised by this test")
    }

    async fn download_file(&self, _dir: &Path, path: &str, out: &Path, version: &str) -> Result<(), EngineError> {
        let src = self.remote_root.join(version).join(path);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        std::fs::copy(&src, out)
            .map_err(|e| EngineError::remote("<fake>", format!("no such remote file {path}@{version}: {e}")))?;
        Ok(())
    }

    async fn project_info(&self, _project_ref: &str, _since: Option<&str>) -> Result<ProjectInfo, EngineError> {
        unimplemented!("not exercised by this test")
    }

    async fn get_push_changes(&self, dir: &Path) -> Result<FileChanges, EngineError> {
        let meta_dir = self.metadata_dir(dir);
        let mut changes = FileChanges::default();
        let mut entries = std::fs::read_dir(dir)
            .map_err(|e| EngineError::remote("<fake>", e.to_string()))?;
        for entry in entries.by_ref().flatten() {
            let path = entry.path();
            if path == meta_dir || path.is_dir() {
                continue;
            }
            let rel = path.strip_prefix(dir).unwrap().to_string_lossy().into_owned();
            let base = meta_dir.join(&rel);
            if !base.exists() {
                changes.added.push(FileEntry { path: rel, size: 0, checksum: None });
            } else if std::fs::read(&path).ok() != std::fs::read(&base).ok() {
                changes.updated.push(FileEntry { path: rel, size: 0, checksum: None });
            }
        }
        Ok(changes)
    }

    async fn get_pull_changes(&self, _dir: &Path, remote_files: &[FileEntry]) -> Result<FileChanges, EngineError> {
        Ok(FileChanges { added: remote_files.to_vec(), updated: Vec::new(), removed: Vec::new() })
    }

    async fn delete_project_now(&self, _project_ref: &str) -> Result<(), EngineError> {
        unimplemented!("not exercised by this test")
    }

    fn metadata_dir(&self, dir: &Path) -> PathBuf {
        dir.join(META_DIR)
    }

    async fn local_version(&self, _dir: &Path) -> Result<String, EngineError> {
        Ok("v1".to_string())
    }

    async fn local_project_id(&self, _dir: &Path) -> Result<Option<uuid::Uuid>, EngineError> {
        Ok(Some(self.project_id))
    }
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn clean_mirror_has_no_pending_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror_root = tmp.path().join("myproj");
    write(&mirror_root.join("data.gpkg"), "gpkg-bytes-v1");
    write(&mirror_root.join(META_DIR).join("data.gpkg"), "gpkg-bytes-v1");

    let store = FakeStore::new(tmp.path().join("remote"));
    let handle = MirrorHandle::resolve(tmp.path(), "myproj", "data.gpkg");

    let leftovers = handle
        .revert_pending_local_changes(&store, "data.gpkg", "v1")
        .await
        .unwrap();
    assert!(leftovers.is_empty(), "a mirror at rest must have no pending changes");
}

#[tokio::test]
async fn added_file_is_deleted_on_revert() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror_root = tmp.path().join("myproj");
    write(&mirror_root.join("data.gpkg"), "gpkg-bytes-v1");
    write(&mirror_root.join(META_DIR).join("data.gpkg"), "gpkg-bytes-v1");
    write(&mirror_root.join("stray.txt"), "should not be here");

    let store = FakeStore::new(tmp.path().join("remote"));
    let handle = MirrorHandle::resolve(tmp.path(), "myproj", "data.gpkg");

    let leftovers = handle
        .revert_pending_local_changes(&store, "data.gpkg", "v1")
        .await
        .unwrap();

    assert!(leftovers.is_empty());
    assert!(!mirror_root.join("stray.txt").exists());
}

#[tokio::test]
async fn locally_modified_gpkg_is_restored_from_basefile() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror_root = tmp.path().join("myproj");
    write(&mirror_root.join("data.gpkg"), "tampered-bytes");
    write(&mirror_root.join(META_DIR).join("data.gpkg"), "gpkg-bytes-v1");

    let store = FakeStore::new(tmp.path().join("remote"));
    let handle = MirrorHandle::resolve(tmp.path(), "myproj", "data.gpkg");

    let leftovers = handle
        .revert_pending_local_changes(&store, "data.gpkg", "v1")
        .await
        .unwrap();

    assert!(leftovers.is_empty());
    assert_eq!(std::fs::read_to_string(mirror_root.join("data.gpkg")).unwrap(), "gpkg-bytes-v1");
}

#[tokio::test]
async fn non_gpkg_file_changes_are_redownloaded_at_mirror_version() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror_root = tmp.path().join("myproj");
    write(&mirror_root.join("data.gpkg"), "gpkg-bytes-v1");
    write(&mirror_root.join(META_DIR).join("data.gpkg"), "gpkg-bytes-v1");
    write(&mirror_root.join("notes.txt"), "edited locally");
    write(&mirror_root.join(META_DIR).join("notes.txt"), "original");
    write(&tmp.path().join("remote").join("v1").join("notes.txt"), "server-truth-at-v1");

    let store = FakeStore::new(tmp.path().join("remote"));
    let handle = MirrorHandle::resolve(tmp.path(), "myproj", "data.gpkg");

    let leftovers = handle
        .revert_pending_local_changes(&store, "data.gpkg", "v1")
        .await
        .unwrap();

    assert!(leftovers.is_empty());
    assert_eq!(std::fs::read_to_string(mirror_root.join("notes.txt")).unwrap(), "server-truth-at-v1");
}
