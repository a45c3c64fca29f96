//! Local sanity reads of the mirrored GeoPackage.
//!
//! The engine never diffs or edits GPKG content directly — that's entirely
//! DIFFTOOL's job (Component A) — but before handing a file to geodiff it's
//! worth confirming it actually opens as a database at all. A half-written
//! download or a disk-full truncation leaves a file that "exists" by every
//! check in [`crate::workdir`] yet makes every subsequent geodiff
//! invocation fail with an opaque non-zero exit; this gives a precise
//! `StateError` instead.

use std::path::Path;

use rusqlite::Connection;

use crate::error::EngineError;

/// Opens `path` read-only and runs `PRAGMA quick_check`, the cheapest
/// integrity probe SQLite offers. Returns the list of user table names
/// (skipping `sqlite_*`/`gpkg_*` bookkeeping tables) for diagnostic
/// logging alongside the error surfaced by a failed `init`/`pull`/`push`.
pub fn sanity_check(path: &Path) -> Result<Vec<String>, EngineError> {
    let project = path.to_string_lossy().into_owned();
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| EngineError::state(&project, format!("GeoPackage is not a readable SQLite database: {e}")))?;

    let quick_check: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|e| EngineError::state(&project, format!("failed to run integrity check on GeoPackage: {e}")))?;
    if quick_check != "ok" {
        return Err(EngineError::state(
            &project,
            format!("GeoPackage failed its integrity check: {quick_check}"),
        ));
    }

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' AND name NOT LIKE 'gpkg\\_%' ESCAPE '\\'")
        .map_err(|e| EngineError::state(&project, format!("failed to list GeoPackage tables: {e}")))?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| EngineError::state(&project, format!("failed to list GeoPackage tables: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::state(&project, format!("failed to list GeoPackage tables: {e}")))?;

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_file_that_is_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-gpkg.gpkg");
        std::fs::write(&path, b"not a sqlite file at all").unwrap();
        assert!(sanity_check(&path).is_err());
    }

    #[test]
    fn lists_user_tables_of_a_valid_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gpkg");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE simple(fid INTEGER PRIMARY KEY, name TEXT, rating INTEGER);
             CREATE TABLE gpkg_contents(table_name TEXT);",
        )
        .unwrap();
        drop(conn);

        let tables = sanity_check(&path).unwrap();
        assert_eq!(tables, vec!["simple".to_string()]);
    }
}
