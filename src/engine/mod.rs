//! Component E — the reconciliation core.
//!
//! Each operation (`init`, `pull`, `push`, `status`, `clean`) implements
//! the same decision tree as its `dbsync.py` namesake: `init()`,
//! `pull()`, `push()`, `status()`, `clean()`. All invariants (I1–I6) live
//! here; A/B/C/D are pure collaborators called from these functions,
//! never from each other.

mod clean;
mod init;
mod pull;
mod push;
mod status;

pub use clean::clean;
pub use init::init;
pub use pull::pull;
pub use push::push;
pub use status::status;

use std::path::PathBuf;

use crate::config::ConnectionConfig;
use crate::difftool::DiffTool;
use crate::error::{ConnInfo, EngineError};
use crate::rdb::RdbStore;
use crate::store::ProjectStore;
use crate::workdir::MirrorHandle;

/// Everything one reconciliation operation needs, bundled into a single
/// value threaded through instead of a long parameter list at every call
/// site.
pub struct SyncContext<'a> {
    pub conn: &'a ConnectionConfig,
    pub difftool: &'a DiffTool,
    pub store: &'a dyn ProjectStore,
    pub working_dir: PathBuf,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        conn: &'a ConnectionConfig,
        difftool: &'a DiffTool,
        store: &'a dyn ProjectStore,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            conn,
            difftool,
            store,
            working_dir,
        }
    }

    pub fn mirror(&self) -> MirrorHandle {
        MirrorHandle::resolve(&self.working_dir, self.conn.project_name(), &self.conn.sync_file)
    }

    pub fn conn_info(&self) -> ConnInfo {
        ConnInfo::new(self.conn.conn_info.clone())
    }

    pub async fn rdb(&self) -> Result<RdbStore, EngineError> {
        RdbStore::connect(&self.conn_info(), self.conn.project_name()).await
    }

    pub fn skip_tables(&self) -> Vec<String> {
        self.conn.ignored_tables()
    }
}

pub(crate) const FORCE_INIT_MESSAGE: &str =
    "Run with --force-init to drop and recreate the sync schemas.";

use crate::difftool::TableChangeSummary;
use std::path::Path;

/// Equivalent of the source's `_compare_datasets`: diff two datasets of
/// possibly different drivers through a scratch changeset file and return
/// its summary. Used by `init` to sanity-check that the three vertices of
/// the triangle agree after a fresh copy.
pub(crate) async fn compare_datasets(
    difftool: &DiffTool,
    src_driver: &str,
    src_conn_info: &str,
    src: &Path,
    dst_driver: &str,
    dst_conn_info: &str,
    dst: &Path,
    skip_tables: &[String],
) -> Result<Vec<TableChangeSummary>, EngineError> {
    let tmp = std::env::temp_dir().join(format!("dbsync-compare-{}", uuid::Uuid::new_v4()));
    difftool
        .diff_across_drivers(
            src_driver,
            src_conn_info,
            src,
            dst_driver,
            dst_conn_info,
            dst,
            &tmp,
            skip_tables,
        )
        .await?;
    let summary = difftool.summary(&tmp).await;
    let _ = tokio::fs::remove_file(&tmp).await;
    summary
}
