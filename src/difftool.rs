//! Component A — the DIFFTOOL (geodiff) subprocess wrapper.
//!
//! Centralizes geodiff's argv grammar behind one sum type per the
//! "Subprocess ABI" design note: the engine calls [`DiffTool`] methods and
//! never builds an argv itself. Every invocation goes through
//! `tokio::process::Command` so a stuck geodiff process doesn't block the
//! rest of the runtime.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;

use crate::error::EngineError;

/// One row of a changeset summary: `{table, insert, update, delete}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableChangeSummary {
    pub table: String,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
}

impl TableChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.insert == 0 && self.update == 0 && self.delete == 0
    }
}

#[derive(Debug, Deserialize)]
struct SummaryFile {
    geodiff_summary: Vec<TableChangeSummary>,
}

#[derive(Debug, Deserialize)]
struct DetailsFile {
    geodiff: serde_json::Value,
}

fn tables_to_string(tables: &[String]) -> String {
    tables.join(";")
}

/// One logical geodiff operation; `argv` knows how to render each variant
/// into the exact argument list geodiff expects, including the
/// single-driver vs two-driver and with/without `--skip-tables` forms.
enum DiffToolOp<'a> {
    Diff {
        driver: &'a str,
        conn_info: &'a str,
        base: &'a Path,
        modified: &'a Path,
        changeset: &'a Path,
        skip_tables: &'a [String],
    },
    DiffAcrossDrivers {
        src_driver: &'a str,
        src_conn_info: &'a str,
        src: &'a Path,
        dst_driver: &'a str,
        dst_conn_info: &'a str,
        dst: &'a Path,
        changeset: &'a Path,
        skip_tables: &'a [String],
    },
    Apply {
        driver: &'a str,
        conn_info: &'a str,
        target: &'a Path,
        changeset: &'a Path,
        skip_tables: &'a [String],
    },
    Rebase {
        driver: &'a str,
        conn_info: &'a str,
        base: &'a Path,
        our: &'a Path,
        base2their: &'a Path,
        conflicts: &'a Path,
        skip_tables: &'a [String],
    },
    Copy {
        src_driver: &'a str,
        src_conn_info: &'a str,
        src: &'a Path,
        dst_driver: &'a str,
        dst_conn_info: &'a str,
        dst: &'a Path,
        skip_tables: &'a [String],
    },
    AsSummary {
        changeset: &'a Path,
        out: &'a Path,
    },
    AsJson {
        changeset: &'a Path,
        out: &'a Path,
    },
}

impl<'a> DiffToolOp<'a> {
    fn argv(&self) -> Vec<OsString> {
        fn os(s: impl AsRef<std::ffi::OsStr>) -> OsString {
            s.as_ref().to_owned()
        }

        match self {
            DiffToolOp::Diff {
                driver,
                conn_info,
                base,
                modified,
                changeset,
                skip_tables,
            } => {
                let mut argv = vec![os("diff"), os("--driver"), os(driver), os(conn_info)];
                if !skip_tables.is_empty() {
                    argv.push(os("--skip-tables"));
                    argv.push(os(tables_to_string(skip_tables)));
                }
                argv.push(os(base));
                argv.push(os(modified));
                argv.push(os(changeset));
                argv
            }
            DiffToolOp::DiffAcrossDrivers {
                src_driver,
                src_conn_info,
                src,
                dst_driver,
                dst_conn_info,
                dst,
                changeset,
                skip_tables,
            } => {
                let mut argv = vec![
                    os("diff"),
                    os("--driver-1"),
                    os(src_driver),
                    os(src_conn_info),
                    os("--driver-2"),
                    os(dst_driver),
                    os(dst_conn_info),
                ];
                if !skip_tables.is_empty() {
                    argv.push(os("--skip-tables"));
                    argv.push(os(tables_to_string(skip_tables)));
                }
                argv.push(os(src));
                argv.push(os(dst));
                argv.push(os(changeset));
                argv
            }
            DiffToolOp::Apply {
                driver,
                conn_info,
                target,
                changeset,
                skip_tables,
            } => {
                let mut argv = vec![os("apply"), os("--driver"), os(driver), os(conn_info)];
                if !skip_tables.is_empty() {
                    argv.push(os("--skip-tables"));
                    argv.push(os(tables_to_string(skip_tables)));
                }
                argv.push(os(target));
                argv.push(os(changeset));
                argv
            }
            DiffToolOp::Rebase {
                driver,
                conn_info,
                base,
                our,
                base2their,
                conflicts,
                skip_tables,
            } => {
                let mut argv = vec![
                    os("rebase-db"),
                    os("--driver"),
                    os(driver),
                    os(conn_info),
                ];
                if !skip_tables.is_empty() {
                    argv.push(os("--skip-tables"));
                    argv.push(os(tables_to_string(skip_tables)));
                }
                argv.push(os(base));
                argv.push(os(our));
                argv.push(os(base2their));
                argv.push(os(conflicts));
                argv
            }
            DiffToolOp::Copy {
                src_driver,
                src_conn_info,
                src,
                dst_driver,
                dst_conn_info,
                dst,
                skip_tables,
            } => {
                let mut argv = vec![
                    os("copy"),
                    os("--driver-1"),
                    os(src_driver),
                    os(src_conn_info),
                    os("--driver-2"),
                    os(dst_driver),
                    os(dst_conn_info),
                ];
                if !skip_tables.is_empty() {
                    argv.push(os("--skip-tables"));
                    argv.push(os(tables_to_string(skip_tables)));
                }
                argv.push(os(src));
                argv.push(os(dst));
                argv
            }
            DiffToolOp::AsSummary { changeset, out } => {
                vec![os("as-summary"), os(changeset), os(out)]
            }
            DiffToolOp::AsJson { changeset, out } => {
                vec![os("as-json"), os(changeset), os(out)]
            }
        }
    }
}

/// Thin handle over the geodiff executable. `log_level` is forwarded to
/// every invocation via `GEODIFF_LOGGER_LEVEL` so geodiff's own verbosity
/// tracks the daemon's.
#[derive(Clone)]
pub struct DiffTool {
    exe: PathBuf,
    log_level: u8,
}

impl DiffTool {
    pub fn new(exe: impl Into<PathBuf>, log_level: u8) -> Self {
        Self {
            exe: exe.into(),
            log_level: log_level.min(4),
        }
    }

    async fn run(&self, op: DiffToolOp<'_>) -> Result<(), EngineError> {
        let argv = op.argv();
        let display_argv: Vec<String> = argv.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        tracing::debug!(exe = %self.exe.display(), argv = ?display_argv, "running geodiff");

        let output = Command::new(&self.exe)
            .args(&argv)
            .env("GEODIFF_LOGGER_LEVEL", self.log_level.to_string())
            .output()
            .await
            .map_err(|e| EngineError::DiffTool {
                argv: display_argv.clone(),
                stderr: format!("failed to spawn geodiff: {e}"),
            })?;

        if !output.stderr.is_empty() {
            tracing::debug!(
                "GEODIFF: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        if !output.status.success() {
            return Err(EngineError::DiffTool {
                argv: display_argv,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    pub async fn diff(
        &self,
        driver: &str,
        conn_info: &str,
        base: &Path,
        modified: &Path,
        changeset: &Path,
        skip_tables: &[String],
    ) -> Result<(), EngineError> {
        self.run(DiffToolOp::Diff {
            driver,
            conn_info,
            base,
            modified,
            changeset,
            skip_tables,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn diff_across_drivers(
        &self,
        src_driver: &str,
        src_conn_info: &str,
        src: &Path,
        dst_driver: &str,
        dst_conn_info: &str,
        dst: &Path,
        changeset: &Path,
        skip_tables: &[String],
    ) -> Result<(), EngineError> {
        self.run(DiffToolOp::DiffAcrossDrivers {
            src_driver,
            src_conn_info,
            src,
            dst_driver,
            dst_conn_info,
            dst,
            changeset,
            skip_tables,
        })
        .await
    }

    pub async fn apply(
        &self,
        driver: &str,
        conn_info: &str,
        target: &Path,
        changeset: &Path,
        skip_tables: &[String],
    ) -> Result<(), EngineError> {
        self.run(DiffToolOp::Apply {
            driver,
            conn_info,
            target,
            changeset,
            skip_tables,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn rebase(
        &self,
        driver: &str,
        conn_info: &str,
        base: &Path,
        our: &Path,
        base2their: &Path,
        conflicts: &Path,
        skip_tables: &[String],
    ) -> Result<(), EngineError> {
        self.run(DiffToolOp::Rebase {
            driver,
            conn_info,
            base,
            our,
            base2their,
            conflicts,
            skip_tables,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn copy(
        &self,
        src_driver: &str,
        src_conn_info: &str,
        src: &Path,
        dst_driver: &str,
        dst_conn_info: &str,
        dst: &Path,
        skip_tables: &[String],
    ) -> Result<(), EngineError> {
        self.run(DiffToolOp::Copy {
            src_driver,
            src_conn_info,
            src,
            dst_driver,
            dst_conn_info,
            dst,
            skip_tables,
        })
        .await
    }

    pub async fn summary(&self, changeset: &Path) -> Result<Vec<TableChangeSummary>, EngineError> {
        let out = temp_output_path("dbsync-changeset-summary");
        let _ = tokio::fs::remove_file(&out).await;
        self.run(DiffToolOp::AsSummary {
            changeset,
            out: &out,
        })
        .await?;
        let text = tokio::fs::read_to_string(&out).await.map_err(|e| EngineError::DiffTool {
            argv: vec!["as-summary".into()],
            stderr: format!("failed to read summary output: {e}"),
        })?;
        let _ = tokio::fs::remove_file(&out).await;
        let parsed: SummaryFile = serde_json::from_str(&text).map_err(|e| EngineError::DiffTool {
            argv: vec!["as-summary".into()],
            stderr: format!("failed to parse summary JSON: {e}"),
        })?;
        Ok(parsed.geodiff_summary)
    }

    pub async fn as_json(&self, changeset: &Path) -> Result<serde_json::Value, EngineError> {
        let out = temp_output_path("dbsync-changeset-details");
        let _ = tokio::fs::remove_file(&out).await;
        self.run(DiffToolOp::AsJson {
            changeset,
            out: &out,
        })
        .await?;
        let text = tokio::fs::read_to_string(&out).await.map_err(|e| EngineError::DiffTool {
            argv: vec!["as-json".into()],
            stderr: format!("failed to read details output: {e}"),
        })?;
        let _ = tokio::fs::remove_file(&out).await;
        let parsed: DetailsFile = serde_json::from_str(&text).map_err(|e| EngineError::DiffTool {
            argv: vec!["as-json".into()],
            stderr: format!("failed to parse details JSON: {e}"),
        })?;
        Ok(parsed.geodiff)
    }

    /// Changeset is non-empty iff geodiff wrote at least one byte to it.
    pub async fn changeset_is_empty(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len() == 0)
            .unwrap_or(true)
    }
}

fn temp_output_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_empty_detects_all_zero() {
        let s = TableChangeSummary {
            table: "points".into(),
            insert: 0,
            update: 0,
            delete: 0,
        };
        assert!(s.is_empty());
    }

    #[test]
    fn tables_to_string_joins_with_semicolon() {
        assert_eq!(
            tables_to_string(&["a".to_string(), "b".to_string()]),
            "a;b"
        );
    }
}
