//! Component F — the orchestrator. Iterates over configured sync
//! connections and drives init→pull→push cycles, in single-run or loop
//! mode: the same single-run-vs-`while True` split, the same
//! session-expiry relogin check, the same sleep-between-cycles cadence
//! as a daemon driving a fixed set of units of work once per cycle,
//! generalized to run every configured `SyncConnection` once, in
//! configuration order, through init/pull/push instead of a single
//! `execute`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::config::{Config, ConnectionConfig};
use crate::difftool::DiffTool;
use crate::engine::{self, SyncContext};
use crate::error::EngineError;
use crate::notification::NotificationThrottle;
use crate::store::ProjectStore;

const RELOGIN_THRESHOLD_HOURS: i64 = 1;

/// Orchestration configuration derived from the CLI flags, kept separate
/// from [`Config`] so it can be constructed directly by callers that
/// don't go through the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorConfig {
    pub skip_init: bool,
    pub force_init: bool,
    pub single_run: bool,
}

impl OrchestratorConfig {
    /// `--force-init` and `--skip-init` are mutually exclusive; clap
    /// itself rejects the combination on the CLI, but anyone constructing
    /// this programmatically gets the same guarantee here.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.skip_init && self.force_init {
            return Err(EngineError::config(
                "--force-init and --skip-init are mutually exclusive",
            ));
        }
        Ok(())
    }
}

/// One outcome per connection per cycle, surfaced to the caller for
/// logging/reporting; `run_single` aggregates these and returns an error
/// if any entry failed, `run_loop` logs and notifies without exiting.
pub struct CycleOutcome {
    pub project: String,
    pub result: Result<(), EngineError>,
}

pub struct SyncOrchestrator {
    config: Config,
    store: Arc<dyn ProjectStore>,
    difftool: DiffTool,
    session_expires: Option<chrono::DateTime<chrono::Utc>>,
    notif_throttle: Option<NotificationThrottle>,
}

impl SyncOrchestrator {
    /// `log_level` (0-4) is forwarded to every geodiff invocation via
    /// `GEODIFF_LOGGER_LEVEL`; it comes from `--log-verbosity`, not the
    /// config file.
    pub fn new(config: Config, store: Arc<dyn ProjectStore>, log_level: u8) -> Self {
        let difftool = DiffTool::new(config.geodiff_exe.clone(), log_level);
        let notif_throttle = config.notification.as_ref().map(NotificationThrottle::new);
        Self {
            config,
            store,
            difftool,
            session_expires: None,
            notif_throttle,
        }
    }

    async fn login(&mut self) -> Result<(), EngineError> {
        let password = self
            .config
            .mergin
            .password
            .as_deref()
            .ok_or_else(|| EngineError::config("mergin.password is required to log in"))?;
        let session = self
            .store
            .login(&self.config.mergin.url, &self.config.mergin.username, password)
            .await?;
        self.session_expires = Some(session.expires);
        tracing::info!(user = %self.config.mergin.username, "logged in to project store");
        Ok(())
    }

    fn relogin_due(&self) -> bool {
        match self.session_expires {
            Some(expires) => expires - chrono::Utc::now() < ChronoDuration::hours(RELOGIN_THRESHOLD_HOURS),
            None => true,
        }
    }

    fn ctx<'a>(&'a self, conn: &'a ConnectionConfig) -> SyncContext<'a> {
        SyncContext::new(conn, &self.difftool, self.store.as_ref(), self.config.working_dir.clone())
    }

    /// `init (unless --skip-init), then one pull, then one push, then
    /// exit`. Returns the first engine error encountered — single-run
    /// mode is fatal on any failure (exit code 1).
    pub async fn run_single(&mut self, opts: OrchestratorConfig) -> Result<(), EngineError> {
        opts.validate()?;
        self.login().await?;

        if opts.force_init {
            self.clean_all().await?;
        }
        if !opts.skip_init {
            self.init_all().await?;
        }

        for conn in self.config.connections.clone() {
            let ctx = self.ctx(&conn);
            engine::pull(&ctx).await?;
            engine::push(&ctx).await?;
        }
        Ok(())
    }

    /// `init once, then forever {pull; push; relogin if needed; sleep}`.
    /// Engine failures are logged and optionally notified but never stop
    /// the loop — only an external termination signal does, observed
    /// between cycles and between pull/push within a cycle. A background
    /// task flips `shutdown` on SIGINT/ctrl-c; the loop body only ever
    /// reads it at those observation points, never mid-operation.
    pub async fn run_loop(&mut self, opts: OrchestratorConfig) -> Result<(), EngineError> {
        opts.validate()?;
        self.login().await?;

        if opts.force_init {
            self.clean_all().await?;
        }
        self.init_all().await?;

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!("failed to install SIGTERM handler: {e}");
                            let _ = tokio::signal::ctrl_c().await;
                            tracing::info!("termination signal received, will stop at the next safe point");
                            shutdown.store(true, Ordering::SeqCst);
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                    tracing::info!("termination signal received, will stop at the next safe point");
                    shutdown.store(true, Ordering::SeqCst);
                }
                #[cfg(not(unix))]
                {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("termination signal received, will stop at the next safe point");
                        shutdown.store(true, Ordering::SeqCst);
                    }
                }
            });
        }

        while !shutdown.load(Ordering::SeqCst) {
            for conn in self.config.connections.clone() {
                let ctx = self.ctx(&conn);
                let project = conn.mergin_project.clone();

                let pull_result = engine::pull(&ctx).await;
                self.report_cycle_outcome(&project, &pull_result);

                let push_result = engine::push(&ctx).await;
                self.report_cycle_outcome(&project, &push_result);

                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }

            if self.relogin_due() {
                tracing::info!("session nearing expiry, re-logging in");
                if let Err(e) = self.login().await {
                    tracing::error!("relogin failed: {e}");
                }
            }

            tokio::time::sleep(self.config.daemon.sleep_duration()).await;
        }
        Ok(())
    }

    async fn clean_all(&self) -> Result<(), EngineError> {
        for conn in &self.config.connections {
            let ctx = self.ctx(conn);
            engine::clean(&ctx, self.config.init_from.is_gpkg()).await?;
        }
        Ok(())
    }

    async fn init_all(&self) -> Result<(), EngineError> {
        for conn in &self.config.connections {
            let ctx = self.ctx(conn);
            engine::init(&ctx, self.config.init_from.is_gpkg()).await?;
        }
        Ok(())
    }

    fn report_cycle_outcome(&mut self, project: &str, result: &Result<(), EngineError>) {
        if let Err(e) = result {
            tracing::error!(project, "cycle failed: {e}");
            if let (Some(notification), Some(throttle)) =
                (self.config.notification.as_ref(), self.notif_throttle.as_mut())
            {
                let subject = format!("{}: {project}", notification.email_subject);
                throttle.notify(notification, &subject, &e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_init_and_skip_init_are_mutually_exclusive() {
        let opts = OrchestratorConfig {
            skip_init: true,
            force_init: true,
            single_run: true,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn default_opts_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }
}
