//! dbsync — continuous two-way synchronization between a versioned
//! project store (hosting a SQLite-backed GeoPackage) and a schema in a
//! PostGIS-capable relational database.
//!
//! A user edits the GeoPackage through mobile/desktop clients that push
//! versioned changes to the project store; independently, operators and
//! applications modify the corresponding "live" tables in the database.
//! This crate's [`orchestrator::SyncOrchestrator`] periodically reconciles
//! both sides so that, after each cycle, the GeoPackage and the database
//! schema contain the same logical state — using three-way diff/merge
//! driven by the external `geodiff` tool.
//!
//! ## Architecture
//!
//! - [`config`] — the `SyncConnection` configuration record and the YAML
//!   config file it's loaded from.
//! - [`difftool`] — the `geodiff` subprocess wrapper (Component A).
//! - [`rdb`] — the database metadata store: per-schema sync metadata
//!   pinned as a JSON schema comment (Component B).
//! - [`store`] — the project-store adapter contract and its HTTP
//!   implementation (Component C).
//! - [`workdir`] — the local working-directory manager: path resolution
//!   and reverting unexpected local edits (Component D).
//! - [`engine`] — the reconciliation core: `init`/`pull`/`push`/`status`/
//!   `clean`, where every invariant lives (Component E).
//! - [`orchestrator`] — drives init→pull→push cycles across every
//!   configured connection, in single-run or daemon-loop mode
//!   (Component F).
//! - [`watcher`] — a supplementary, non-load-bearing mirror-anomaly
//!   watcher for operator-facing logging between cycles.
//! - [`notification`] — SMTP failure notification with a throttle so a
//!   misbehaving connection doesn't produce a mail storm.
//! - [`error`] — the tagged error taxonomy and connection-string
//!   redaction.

pub mod config;
pub mod difftool;
pub mod engine;
pub mod error;
pub mod gpkg;
pub mod notification;
pub mod orchestrator;
pub mod rdb;
pub mod store;
pub mod watcher;
pub mod workdir;

pub use config::Config;
pub use engine::SyncContext;
pub use error::{ConnInfo, EngineError};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator};
pub use store::http::HttpProjectStore;
pub use store::ProjectStore;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
