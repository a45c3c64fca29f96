//! CLI entry point for the dbsync daemon.
//!
//! Parses the CLI surface, loads and validates the YAML config, wires up
//! logging, and hands off to [`dbsync::orchestrator::SyncOrchestrator`].
//! Everything here is plumbing; no sync invariant is decided in this file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use dbsync::config::{resolve_config_path, Config};
use dbsync::notification::send_now;
use dbsync::orchestrator::{OrchestratorConfig, SyncOrchestrator};
use dbsync::store::http::HttpProjectStore;

/// geodiff's own numeric `GEODIFF_LOGGER_LEVEL`, which the original tool
/// hardcodes and never exposes on its CLI; kept as a constant here for the
/// same reason rather than reintroduced as a flag.
const GEODIFF_LOGGER_LEVEL: u8 = 4;

/// `--log-verbosity`, controlling the tracing `EnvFilter` applied to both
/// log sinks — unrelated to geodiff's own subprocess logging level.
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogVerbosity {
    Errors,
    #[default]
    Messages,
}

impl LogVerbosity {
    fn filter_directive(self) -> &'static str {
        match self {
            LogVerbosity::Errors => "warn",
            LogVerbosity::Messages => "info",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dbsync", about = "Two-way sync between a project store GeoPackage and a PostGIS schema")]
struct Cli {
    /// Path to the YAML config file. If omitted, `./config.yaml` and the
    /// platform config directory's `dbsync/config.yaml` are tried in turn.
    config_file: Option<PathBuf>,

    /// Skip the init step and go straight to pull/push.
    #[arg(long, conflicts_with = "force_init")]
    skip_init: bool,

    /// Run exactly one init→pull→push cycle and exit, instead of looping.
    #[arg(long)]
    single_run: bool,

    /// Drop and recreate the sync schemas for every connection before init.
    #[arg(long, conflicts_with = "skip_init")]
    force_init: bool,

    /// Write logs to this file in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Daemon log verbosity for both the stderr and file log sinks.
    #[arg(long, value_enum, default_value = "messages")]
    log_verbosity: LogVerbosity,

    /// Send a test notification email using the configured SMTP settings
    /// and exit, without touching any sync connection.
    #[arg(long)]
    test_notification_email: bool,

    /// Print the parsed, redacted config and exit.
    #[arg(long)]
    show_config: bool,
}

fn init_logging(
    log_file: &Option<PathBuf>,
    verbosity: LogVerbosity,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("dbsync.log"));
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_file, cli.log_verbosity);

    let config_path = match resolve_config_path(cli.config_file.clone()) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if cli.show_config {
        println!("{}", config.redacted_summary());
        return std::process::ExitCode::SUCCESS;
    }

    if cli.test_notification_email {
        return match &config.notification {
            Some(notification) => match send_now(notification, "dbsync test notification", "This is a test notification from dbsync --test-notification-email.") {
                Ok(()) => {
                    println!("test notification sent");
                    std::process::ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to send test notification: {e}");
                    std::process::ExitCode::FAILURE
                }
            },
            None => {
                eprintln!("no `notification` block configured");
                std::process::ExitCode::FAILURE
            }
        };
    }

    let store = Arc::new(HttpProjectStore::new(config.mergin.url.clone()));
    let mut orchestrator = SyncOrchestrator::new(config, store, GEODIFF_LOGGER_LEVEL);

    let opts = OrchestratorConfig {
        skip_init: cli.skip_init,
        force_init: cli.force_init,
        single_run: cli.single_run,
    };

    let result = if cli.single_run {
        orchestrator.run_single(opts).await
    } else {
        orchestrator.run_loop(opts).await
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
