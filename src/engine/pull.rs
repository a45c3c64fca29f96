//! `pull(conn)` — bring edits made on the project store's GPKG down into
//! the MODIFIED schema, rebasing against any unpushed local edits first.
//! Grounded on `dbsync.py::pull()`.

use crate::error::EngineError;
use crate::rdb::ProjectComment;

use super::SyncContext;

pub async fn pull(ctx: &SyncContext<'_>) -> Result<(), EngineError> {
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

    let leftovers = mirror
        .revert_pending_local_changes(ctx.store, &ctx.conn.sync_file, &comment.version)
        .await?;
    if !leftovers.is_empty() {
        return Err(EngineError::state(
            project,
            format!("pending local changes in the working directory: {leftovers:?}"),
        ));
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
    if server_info.version == comment.version {
        tracing::debug!(project, "nothing to pull, mirror already at the latest version");
        return Ok(());
    }

    let base2our = std::env::temp_dir().join(format!("dbsync-pull-{}-base2our", uuid::Uuid::new_v4()));
    ctx.difftool
        .diff(
            "postgres",
            &ctx.conn.conn_info,
            &std::path::PathBuf::from(&ctx.conn.base),
            &std::path::PathBuf::from(&ctx.conn.modified),
            &base2our,
            &skip_tables,
        )
        .await?;
    let needs_rebase = !crate::difftool::DiffTool::changeset_is_empty(&base2our).await;

    // `mirror.basefile_path` resolves to the adapter's own basefile, which
    // `pull_project` overwrites with the freshly-pulled content as part of
    // its own bookkeeping — snapshotting into that path and diffing it
    // against `mirror.sync_file` afterwards would diff new content against
    // itself. Snapshot into a dedicated temp path instead, so it still
    // holds the pre-pull content once `pull_project` returns.
    let basefile_old = std::env::temp_dir().join(format!("dbsync-pull-{}-basefile-old", uuid::Uuid::new_v4()));
    tokio::fs::copy(&mirror.sync_file, &basefile_old)
        .await
        .map_err(|e| EngineError::state(project, format!("failed to snapshot pre-pull GeoPackage: {e}")))?;

    ctx.store.pull_project(&mirror.root).await?;

    let base2their = std::env::temp_dir().join(format!("dbsync-pull-{}-base2their", uuid::Uuid::new_v4()));
    ctx.difftool
        .diff(
            "sqlite",
            "",
            &basefile_old,
            &mirror.sync_file,
            &base2their,
            &skip_tables,
        )
        .await?;

    if crate::difftool::DiffTool::changeset_is_empty(&base2their).await {
        let _ = tokio::fs::remove_file(&base2our).await;
        let _ = tokio::fs::remove_file(&base2their).await;
        let _ = tokio::fs::remove_file(&basefile_old).await;
        tracing::debug!(project, "pulled project store had no geopackage content changes");
        advance_base_version(ctx, &rdb, &comment, project).await?;
        return Ok(());
    }

    if needs_rebase {
        let conflicts = std::env::temp_dir().join(format!("dbsync-pull-{}-conflicts", uuid::Uuid::new_v4()));
        if let Err(e) = ctx
            .difftool
            .rebase(
                "postgres",
                &ctx.conn.conn_info,
                &std::path::PathBuf::from(&ctx.conn.base),
                &std::path::PathBuf::from(&ctx.conn.modified),
                &base2their,
                &conflicts,
                &skip_tables,
            )
            .await
        {
            let _ = tokio::fs::remove_file(&base2our).await;
            let _ = tokio::fs::remove_file(&base2their).await;
            let _ = tokio::fs::remove_file(&basefile_old).await;
            return Err(e);
        }
        if !crate::difftool::DiffTool::changeset_is_empty(&conflicts).await {
            tracing::warn!(
                project,
                conflicts = %conflicts.display(),
                "pull produced conflicts; both versions are recorded, rebased value kept in modified"
            );
        }
        let _ = tokio::fs::remove_file(&conflicts).await;
    } else if let Err(e) = ctx
        .difftool
        .apply(
            "postgres",
            &ctx.conn.conn_info,
            &std::path::PathBuf::from(&ctx.conn.modified),
            &base2their,
            &skip_tables,
        )
        .await
    {
        let _ = tokio::fs::remove_file(&base2our).await;
        let _ = tokio::fs::remove_file(&base2their).await;
        let _ = tokio::fs::remove_file(&basefile_old).await;
        return Err(e);
    }

    if let Err(e) = ctx
        .difftool
        .apply(
            "postgres",
            &ctx.conn.conn_info,
            &std::path::PathBuf::from(&ctx.conn.base),
            &base2their,
            &skip_tables,
        )
        .await
    {
        let _ = tokio::fs::remove_file(&base2our).await;
        let _ = tokio::fs::remove_file(&base2their).await;
        let _ = tokio::fs::remove_file(&basefile_old).await;
        return Err(e);
    }

    let _ = tokio::fs::remove_file(&base2our).await;
    let _ = tokio::fs::remove_file(&base2their).await;
    let _ = tokio::fs::remove_file(&basefile_old).await;

    advance_base_version(ctx, &rdb, &comment, project).await
}

async fn advance_base_version(
    ctx: &SyncContext<'_>,
    rdb: &crate::rdb::RdbStore,
    comment: &ProjectComment,
    project: &str,
) -> Result<(), EngineError> {
    let mirror = ctx.mirror();
    let new_version = ctx.store.local_version(&mirror.root).await?;
    let mut new_comment = ProjectComment::new(project, &new_version);
    if let Some(id) = comment.project_id {
        new_comment = new_comment.with_project_id(id);
    }
    rdb.set_project_comment(&ctx.conn.base, &new_comment).await?;
    tracing::info!(project, version = %new_version, "pulled remote changes");
    Ok(())
}
