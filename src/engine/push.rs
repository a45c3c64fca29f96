//! `push(conn)` — propagate edits from the MODIFIED schema down to the
//! GPKG mirror and up to the project store. Grounded on `dbsync.py::push()`.

use crate::error::EngineError;
use crate::rdb::ProjectComment;

use super::SyncContext;

pub async fn push(ctx: &SyncContext<'_>) -> Result<(), EngineError> {
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
    if server_info.version != comment.version {
        return Err(EngineError::state(
            project,
            format!(
                "server project is at version {} but the mirror is at {}; pull before pushing",
                server_info.version, comment.version
            ),
        ));
    }

    let base2our = std::env::temp_dir().join(format!("dbsync-push-{}-base2our", uuid::Uuid::new_v4()));
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

    if crate::difftool::DiffTool::changeset_is_empty(&base2our).await {
        let _ = tokio::fs::remove_file(&base2our).await;
        tracing::debug!(project, "nothing to push, base and modified are already in sync");
        return Ok(());
    }

    let apply_result = ctx
        .difftool
        .apply(
            "sqlite",
            "",
            &mirror.sync_file,
            &base2our,
            &skip_tables,
        )
        .await;
    if let Err(e) = apply_result {
        let _ = tokio::fs::remove_file(&base2our).await;
        rdb.set_project_comment(
            &ctx.conn.base,
            &comment.clone().with_error(format!(
                "failed to apply local changes to the GPKG mirror: {e}"
            )),
        )
        .await
        .ok();
        return Err(e);
    }

    if let Err(e) = ctx.store.push_project(&mirror.root).await {
        let _ = tokio::fs::remove_file(&base2our).await;
        rdb.set_project_comment(
            &ctx.conn.base,
            &comment.clone().with_error(format!(
                "GPKG was rewritten locally but pushing to the project store failed: {e}; \
                 the mirror and base schema are now out of sync and must be reconciled manually"
            )),
        )
        .await
        .ok();
        return Err(e);
    }

    if let Err(e) = ctx
        .difftool
        .apply(
            "postgres",
            &ctx.conn.conn_info,
            &std::path::PathBuf::from(&ctx.conn.base),
            &base2our,
            &skip_tables,
        )
        .await
    {
        let _ = tokio::fs::remove_file(&base2our).await;
        return Err(e);
    }
    let _ = tokio::fs::remove_file(&base2our).await;

    let new_version = ctx.store.local_version(&mirror.root).await?;
    let mut new_comment = ProjectComment::new(project, &new_version);
    if let Some(id) = comment.project_id {
        new_comment = new_comment.with_project_id(id);
    }
    rdb.set_project_comment(&ctx.conn.base, &new_comment).await?;

    tracing::info!(project, version = %new_version, "pushed local changes");
    Ok(())
}
