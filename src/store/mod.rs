//! Component C — the project-store adapter.
//!
//! The engine requires only the contract in [`ProjectStore`]; the wire
//! protocol to the remote project store is entirely the adapter's
//! concern. [`http`] provides the concrete HTTP implementation; tests
//! supply an in-memory fake implementing the same trait.

pub mod http;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A file entry as reported by the project store, e.g. inside
/// `project_info`'s `files` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// `{added, updated, removed}` — the shape shared by `get_push_changes`
/// and `get_pull_changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    pub added: Vec<FileEntry>,
    pub updated: Vec<FileEntry>,
    pub removed: Vec<FileEntry>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: uuid::Uuid,
    pub version: String,
    pub files: Vec<FileEntry>,
}

/// Bearer-token session handle. `expires` lets the orchestrator decide
/// when to relogin without the adapter exposing any further internals.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn expires_within(&self, threshold: chrono::Duration) -> bool {
        self.expires - chrono::Utc::now() < threshold
    }
}

/// The engine's entire contract with the remote project store.
/// Both `LoginError` and `ClientError` from the source map onto
/// [`EngineError::Remote`] here; only the orchestrator distinguishes them
/// (by attempting a relogin on session expiry, not by matching this trait's
/// error value).
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn login(&self, url: &str, user: &str, pass: &str) -> Result<Session, EngineError>;

    async fn download_project(
        &self,
        project_ref: &str,
        dir: &Path,
        version: Option<&str>,
    ) -> Result<(), EngineError>;

    async fn pull_project(&self, dir: &Path) -> Result<(), EngineError>;

    async fn push_project(&self, dir: &Path) -> Result<(), EngineError>;

    async fn download_file(
        &self,
        dir: &Path,
        path: &str,
        out: &Path,
        version: &str,
    ) -> Result<(), EngineError>;

    async fn project_info(
        &self,
        project_ref: &str,
        since: Option<&str>,
    ) -> Result<ProjectInfo, EngineError>;

    async fn get_push_changes(&self, dir: &Path) -> Result<FileChanges, EngineError>;

    async fn get_pull_changes(
        &self,
        dir: &Path,
        remote_files: &[FileEntry],
    ) -> Result<FileChanges, EngineError>;

    async fn delete_project_now(&self, project_ref: &str) -> Result<(), EngineError>;

    /// Path to the mirror's hidden metadata subdirectory, where the
    /// basefile lives. Exposed explicitly per the "file path conventions"
    /// design note rather than assumed by the engine.
    fn metadata_dir(&self, dir: &Path) -> std::path::PathBuf;

    /// Current on-disk project version, read from the mirror's metadata.
    async fn local_version(&self, dir: &Path) -> Result<String, EngineError>;

    /// Current on-disk project id, read from the mirror's metadata, if any.
    async fn local_project_id(&self, dir: &Path) -> Result<Option<uuid::Uuid>, EngineError>;
}
