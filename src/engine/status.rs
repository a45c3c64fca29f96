//! `status(conn)` — read-only check, grounded on `dbsync.py::status()`.

use crate::difftool::TableChangeSummary;
use crate::error::EngineError;
use crate::store::FileChanges;

use super::{compare_datasets, SyncContext};

/// What `pull`/`push` would do, without doing it.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub project: String,
    pub base_version: String,
    pub server_version: String,
    pub pending_server_changes: FileChanges,
    pub base_to_modified: Vec<TableChangeSummary>,
    pub needs_pull: bool,
    pub needs_push: bool,
}

pub async fn status(ctx: &SyncContext<'_>) -> Result<StatusReport, EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let skip_tables = ctx.skip_tables();
    let rdb = ctx.rdb().await?;
    let mirror = ctx.mirror();

    mirror.require_working_dir().await?;
    mirror.require_sync_file().await?;

    let comment = rdb.get_project_comment(&ctx.conn.base).await?.ok_or_else(|| {
        EngineError::state(project, "base schema is missing its sync metadata; run init first")
    })?;
    if let Some(error) = &comment.error {
        return Err(EngineError::state(project, error.clone()));
    }

    let server_info = ctx.store.project_info(project, Some(&comment.version)).await?;
    if let Some(local_id) = comment.project_id {
        if local_id != server_info.id {
            return Err(EngineError::ProjectIdMismatch {
                project: project.to_string(),
                local: local_id,
                server: server_info.id,
            });
        }
    }
    let pending_server_changes = ctx
        .store
        .get_pull_changes(&mirror.root, &server_info.files)
        .await?;

    let base_to_modified = compare_datasets(
        ctx.difftool,
        "postgres",
        &ctx.conn.conn_info,
        &std::path::PathBuf::from(&ctx.conn.base),
        "postgres",
        &ctx.conn.conn_info,
        &std::path::PathBuf::from(&ctx.conn.modified),
        &skip_tables,
    )
    .await?;

    let needs_push = base_to_modified.iter().any(|s| !s.is_empty());
    let needs_pull = server_info.version != comment.version;

    Ok(StatusReport {
        project: project.to_string(),
        base_version: comment.version,
        server_version: server_info.version,
        pending_server_changes,
        base_to_modified,
        needs_pull,
        needs_push,
    })
}
