//! `init(conn, from_gpkg)` — grounded on `dbsync.py::init()`.

use crate::error::EngineError;
use crate::rdb::ProjectComment;

use super::{compare_datasets, SyncContext, FORCE_INIT_MESSAGE};

pub async fn init(ctx: &SyncContext<'_>, from_gpkg: bool) -> Result<(), EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let skip_tables = ctx.skip_tables();
    let rdb = ctx.rdb().await?;

    if !rdb.check_postgis().await? && !rdb.try_install_postgis().await {
        return Err(EngineError::rdb(
            project,
            "cannot find or activate the `postgis` extension; you may need to install it",
        ));
    }

    let base_exists = rdb.schema_exists(&ctx.conn.base).await?;
    let modified_exists = rdb.schema_exists(&ctx.conn.modified).await?;

    if base_exists && modified_exists {
        init_both_exist(ctx, &rdb, from_gpkg, &skip_tables).await
    } else if !base_exists && !modified_exists {
        init_neither_exists(ctx, &rdb, from_gpkg, &skip_tables).await
    } else {
        Err(EngineError::state(
            project,
            format!(
                "partial initialization detected (base_exists={base_exists}, modified_exists={modified_exists}). \
                 This may be a result of a previously failed attempt to initialize. {FORCE_INIT_MESSAGE}"
            ),
        ))
    }
}

async fn init_both_exist(
    ctx: &SyncContext<'_>,
    rdb: &crate::rdb::RdbStore,
    from_gpkg: bool,
    skip_tables: &[String],
) -> Result<(), EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let comment = rdb
        .get_project_comment(&ctx.conn.base)
        .await?
        .ok_or_else(|| {
            EngineError::state(
                project,
                format!(
                    "base schema exists but is missing its sync metadata; init previously failed. {FORCE_INIT_MESSAGE}"
                ),
            )
        })?;

    if let Some(error) = &comment.error {
        let mirror = ctx.mirror();
        if mirror.exists() {
            let diff = compare_datasets(
                ctx.difftool,
                "sqlite",
                "",
                &mirror.sync_file,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.base),
                skip_tables,
            )
            .await;
            if let Ok(summary) = diff {
                tracing::debug!(?summary, "changeset from previously failed init");
            }
        }
        return Err(EngineError::state(project, error.clone()));
    }

    let mirror = ctx.mirror();
    if !mirror.exists() {
        ctx.store
            .download_project(project, &ctx.working_dir.join(ctx.conn.project_name()), Some(&comment.version))
            .await?;
        let server_info = ctx.store.project_info(project, None).await?;
        if comment.project_id.is_some() && comment.project_id != Some(server_info.id) {
            return Err(EngineError::ProjectIdMismatch {
                project: project.to_string(),
                local: comment.project_id.unwrap(),
                server: server_info.id,
            });
        }
    } else {
        let local_version = ctx.store.local_version(&mirror.root).await?;
        let local_id = ctx.store.local_project_id(&mirror.root).await?;
        if let (Some(db_id), Some(local_id)) = (comment.project_id, local_id) {
            if db_id != local_id {
                return Err(EngineError::ProjectIdMismatch {
                    project: project.to_string(),
                    local: local_id,
                    server: db_id,
                });
            }
        }
        if local_version != comment.version {
            tokio::fs::remove_dir_all(&mirror.root).await.ok();
            ctx.store
                .download_project(project, &mirror.root, Some(&comment.version))
                .await?;
        }
    }

    let mirror = ctx.mirror();
    let leftovers = mirror
        .revert_pending_local_changes(ctx.store, &ctx.conn.sync_file, &comment.version)
        .await?;
    if !leftovers.is_empty() {
        return Err(EngineError::state(
            project,
            format!("pending local changes in the working directory: {leftovers:?}"),
        ));
    }

    check_triangle_in_sync(ctx, skip_tables, from_gpkg, Some(&comment)).await
}

async fn init_neither_exists(
    ctx: &SyncContext<'_>,
    rdb: &crate::rdb::RdbStore,
    from_gpkg: bool,
    skip_tables: &[String],
) -> Result<(), EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let mirror = ctx.mirror();
    if !mirror.exists() {
        ctx.store.download_project(project, &mirror.root, None).await?;
    }

    let leftovers = mirror
        .revert_pending_local_changes(ctx.store, &ctx.conn.sync_file, "")
        .await?;
    if !leftovers.is_empty() {
        return Err(EngineError::state(
            project,
            format!("pending local changes in the working directory: {leftovers:?}"),
        ));
    }

    let local_version = ctx.store.local_version(&mirror.root).await?;
    let local_id = ctx.store.local_project_id(&mirror.root).await?;

    if from_gpkg {
        mirror.require_sync_file().await?;

        if let Err(e) = ctx
            .difftool
            .copy(
                "sqlite",
                "",
                &mirror.sync_file,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                skip_tables,
            )
            .await
        {
            return Err(e);
        }
        if let Err(e) = ctx
            .difftool
            .copy(
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.base),
                skip_tables,
            )
            .await
        {
            rdb.drop_schema(&ctx.conn.modified).await.ok();
            return Err(e);
        }

        let changes = compare_datasets(
            ctx.difftool,
            "sqlite",
            "",
            &mirror.sync_file,
            "postgres",
            &ctx.conn.conn_info,
            &path_for_schema(&ctx.conn.base),
            skip_tables,
        )
        .await?;
        if !changes.is_empty() {
            rdb.drop_schema(&ctx.conn.base).await.ok();
            rdb.drop_schema(&ctx.conn.modified).await.ok();
            return Err(EngineError::state(
                project,
                "initialization failed due to a bug in geodiff: base and source GPKG differ right after copy",
            ));
        }

        let mut comment = ProjectComment::new(project, &local_version);
        if let Some(id) = local_id {
            comment = comment.with_project_id(id);
        }
        rdb.set_project_comment(&ctx.conn.base, &comment).await?;
    } else {
        if !rdb.schema_exists(&ctx.conn.modified).await? {
            return Err(EngineError::state(
                project,
                format!(
                    "the 'modified' schema does not exist: {}. It must be populated externally when init_from is db.",
                    ctx.conn.modified
                ),
            ));
        }

        if let Err(e) = ctx
            .difftool
            .copy(
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.base),
                skip_tables,
            )
            .await
        {
            return Err(e);
        }
        if let Err(e) = ctx
            .difftool
            .copy(
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                "sqlite",
                "",
                &mirror.sync_file,
                skip_tables,
            )
            .await
        {
            rdb.drop_schema(&ctx.conn.base).await.ok();
            return Err(e);
        }

        let changes = compare_datasets(
            ctx.difftool,
            "sqlite",
            "",
            &mirror.sync_file,
            "postgres",
            &ctx.conn.conn_info,
            &path_for_schema(&ctx.conn.base),
            skip_tables,
        )
        .await?;
        if !changes.is_empty() {
            rdb.drop_schema(&ctx.conn.base).await.ok();
            return Err(EngineError::state(
                project,
                "initialization failed due to a bug in geodiff: base and generated GPKG differ right after copy",
            ));
        }

        ctx.store.push_project(&mirror.root).await?;
        let version = ctx.store.local_version(&mirror.root).await?;
        let id = ctx.store.local_project_id(&mirror.root).await?;
        let mut comment = ProjectComment::new(project, &version);
        if let Some(id) = id {
            comment = comment.with_project_id(id);
        }
        rdb.set_project_comment(&ctx.conn.base, &comment).await?;
    }

    Ok(())
}

/// After both BASE and MODIFIED already exist, verify the triangle agrees
/// with the current GPKG (or is at least internally consistent for a
/// db-mode init) — no-op if so, hard error if BASE is corrupted, or a
/// "run pull/push" notice if only MODIFIED has drifted.
async fn check_triangle_in_sync(
    ctx: &SyncContext<'_>,
    skip_tables: &[String],
    from_gpkg: bool,
    comment: Option<&ProjectComment>,
) -> Result<(), EngineError> {
    let project = ctx.conn.mergin_project.as_str();
    let mirror = ctx.mirror();
    mirror.require_sync_file().await?;

    let (base_vertex, modified_vertex) = if from_gpkg {
        (
            compare_datasets(
                ctx.difftool,
                "sqlite",
                "",
                &mirror.sync_file,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.base),
                skip_tables,
            )
            .await?,
            compare_datasets(
                ctx.difftool,
                "sqlite",
                "",
                &mirror.sync_file,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                skip_tables,
            )
            .await?,
        )
    } else {
        (
            compare_datasets(
                ctx.difftool,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.base),
                "sqlite",
                "",
                &mirror.sync_file,
                skip_tables,
            )
            .await?,
            compare_datasets(
                ctx.difftool,
                "postgres",
                &ctx.conn.conn_info,
                &path_for_schema(&ctx.conn.modified),
                "sqlite",
                "",
                &mirror.sync_file,
                skip_tables,
            )
            .await?,
        )
    };

    if !base_vertex.is_empty() {
        let version = comment.map(|c| c.version.as_str()).unwrap_or("?");
        return Err(EngineError::state(
            project,
            format!(
                "the 'base' schema is not synchronized with the source GPKG (mirror at version {version}). {FORCE_INIT_MESSAGE}"
            ),
        ));
    }
    if !modified_vertex.is_empty() {
        tracing::info!(project, "modified schema is not in sync with GPKG; run pull/push to reconcile");
        return Ok(());
    }
    tracing::debug!(project, "GPKG, base and modified schemas are already initialized and in sync");
    Ok(())
}

fn path_for_schema(schema: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(schema)
}

trait SummaryVecExt {
    fn is_empty(&self) -> bool;
}

impl SummaryVecExt for Vec<crate::difftool::TableChangeSummary> {
    fn is_empty(&self) -> bool {
        self.iter().all(|s| s.is_empty())
    }
}
