//! `clean(conn, from_gpkg)` — destructive force-init path, grounded on
//! `dbsync.py::clean()`.

use crate::error::EngineError;

use super::SyncContext;

/// Removes the local mirror and drops the sync schemas so a subsequent
/// `init` starts from a blank slate. Never deletes the project on the
/// remote project store; in `db` mode it does erase the server-side copy
/// of the GPKG file specifically (the db side is authoritative there, so
/// the GPKG mirror is considered disposable), via a scratch download that
/// is always cleaned up afterwards regardless of outcome.
pub async fn clean(ctx: &SyncContext<'_>, from_gpkg: bool) -> Result<(), EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let rdb = ctx.rdb().await?;

    let mirror = ctx.mirror();
    if mirror.exists() {
        tracing::warn!(project, path = %mirror.root.display(), "removing local mirror");
        tokio::fs::remove_dir_all(&mirror.root)
            .await
            .map_err(|e| EngineError::state(project, format!("failed to remove working directory: {e}")))?;
    }

    if !from_gpkg {
        erase_server_side_gpkg(ctx, project).await;
    }

    if rdb.schema_exists(&ctx.conn.base).await? {
        tracing::warn!(project, schema = %ctx.conn.base, "dropping base schema");
        rdb.drop_schema(&ctx.conn.base).await?;
    }
    if from_gpkg && rdb.schema_exists(&ctx.conn.modified).await? {
        tracing::warn!(project, schema = %ctx.conn.modified, "dropping modified schema");
        rdb.drop_schema(&ctx.conn.modified).await?;
    }

    Ok(())
}

/// In `db` mode the `modified` schema pre-existed the connection and
/// outlives `clean`; only the GPKG mirror of it was created by init, so
/// this removes that file from the project store via a scratch checkout.
/// Failures here are logged, not propagated — the schema drops below are
/// the part of `clean` that must succeed.
async fn erase_server_side_gpkg(ctx: &SyncContext<'_>, project: &str) {
    let scratch = std::env::temp_dir().join(format!("dbsync-clean-{}", uuid::Uuid::new_v4()));
    let outcome: Result<(), EngineError> = async {
        ctx.store.download_project(project, &scratch, None).await?;
        let sync_file = scratch.join(&ctx.conn.sync_file);
        if sync_file.exists() {
            tokio::fs::remove_file(&sync_file)
                .await
                .map_err(|e| EngineError::state(project, format!("failed to remove scratch sync file: {e}")))?;
        }
        ctx.store.push_project(&scratch).await
    }
    .await;

    if let Err(e) = outcome {
        tracing::warn!(project, "failed to erase server-side GPKG during clean: {e}");
    }
    let _ = tokio::fs::remove_dir_all(&scratch).await;
}
