//! Component B — the RDB metadata store.
//!
//! Owns the single source of truth for "which project version is BASE
//! currently aligned with": the JSON [`ProjectComment`] pinned to the BASE
//! schema via `COMMENT ON SCHEMA`. Every writer supplies the full record —
//! there is no partial-update method — so P4 (atomicity of advancement)
//! holds by construction.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio_postgres::{Client, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::error::{ConnInfo, EngineError};

static CRYPTO_PROVIDER: OnceCell<()> = OnceCell::new();

/// `rustls` 0.23 requires a process-wide default crypto provider to be
/// installed before any `ClientConfig` is built; installing it lazily here
/// (rather than in `main`) keeps every `RdbStore::connect` call site safe
/// regardless of which binary or test drives it first.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Builds a rustls TLS connector seeded with the platform's native trust
/// store, the same source `astral-sh-uv` uses for outbound TLS.
fn tls_connector() -> Result<MakeRustlsConnect, EngineError> {
    ensure_crypto_provider();
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!("failed to load a native root certificate: {err}");
    }
    for cert in loaded.certs {
        roots
            .add(cert)
            .map_err(|e| EngineError::rdb("<tls>", format!("invalid native root certificate: {e}")))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

/// `conn_info` opts into TLS the same way libpq does: any `sslmode` other
/// than `disable` (including its absence of an explicit `disable`, which
/// the source config always pairs with an RDS/managed Postgres instance).
fn wants_tls(conn_info: &str) -> bool {
    conn_info
        .split_whitespace()
        .filter_map(|tok| tok.strip_prefix("sslmode="))
        .any(|mode| !matches!(mode.trim_matches(['\'', '"']), "disable"))
}

/// The JSON blob stored as the schema comment on BASE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectComment {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectComment {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            project_id: None,
            error: None,
        }
    }

    pub fn with_project_id(mut self, id: uuid::Uuid) -> Self {
        self.project_id = Some(id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Quotes a schema/identifier so arbitrary names (spaces, hyphens, mixed
/// case) round-trip safely. Identifiers can't be bound as SQL parameters,
/// so this is spliced into DDL text directly — but values never are.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct RdbStore {
    client: Client,
}

impl RdbStore {
    /// Opens a single connection for the duration of one reconciliation
    /// operation; no pooling required since each cycle only ever touches
    /// one connection at a time. `conn_info` accepts a libpq-style DSN
    /// the same way `psycopg2.connect(conn_info)` does.
    pub async fn connect(conn_info: &ConnInfo, project: &str) -> Result<Self, EngineError> {
        let client = if wants_tls(conn_info.as_raw()) {
            let connector = tls_connector()?;
            let (client, connection) = tokio_postgres::connect(conn_info.as_raw(), connector)
                .await
                .map_err(|e| EngineError::rdb(project, format!("unable to connect to the database: {e}")))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {e}");
                }
            });
            client
        } else {
            let (client, connection) = tokio_postgres::connect(conn_info.as_raw(), NoTls)
                .await
                .map_err(|e| EngineError::rdb(project, format!("unable to connect to the database: {e}")))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {e}");
                }
            });
            client
        };

        Ok(Self { client })
    }

    pub async fn schema_exists(&self, schema: &str) -> Result<bool, EngineError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                &[&schema],
            )
            .await
            .map_err(|e| EngineError::rdb(schema, format!("schema_exists query failed: {e}")))?;
        Ok(row.get(0))
    }

    pub async fn drop_schema(&self, schema: &str) -> Result<(), EngineError> {
        let stmt = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema));
        self.client
            .execute(&stmt, &[])
            .await
            .map_err(|e| EngineError::rdb(schema, format!("unable to drop schema: {e}")))?;
        Ok(())
    }

    pub async fn check_postgis(&self) -> Result<bool, EngineError> {
        let rows = self
            .client
            .query("SELECT extname FROM pg_extension", &[])
            .await
            .map_err(|e| EngineError::rdb("<postgis>", format!("pg_extension query failed: {e}")))?;
        Ok(rows
            .iter()
            .any(|row| row.get::<_, String>(0).eq_ignore_ascii_case("postgis")))
    }

    /// Attempts `CREATE EXTENSION postgis`. Returns `Ok(true)` on success,
    /// `Ok(false)` if the statement failed for any reason (permissions,
    /// extension unavailable) — the caller decides whether that's fatal.
    pub async fn try_install_postgis(&self) -> bool {
        self.client
            .execute("CREATE EXTENSION postgis", &[])
            .await
            .is_ok()
    }

    pub async fn set_project_comment(
        &self,
        schema: &str,
        comment: &ProjectComment,
    ) -> Result<(), EngineError> {
        let body = serde_json::to_string(comment)
            .map_err(|e| EngineError::rdb(schema, format!("failed to serialize comment: {e}")))?;
        let stmt = format!("COMMENT ON SCHEMA {} IS $1", quote_ident(schema));
        self.client
            .execute(&stmt, &[&body])
            .await
            .map_err(|e| EngineError::rdb(schema, format!("failed to set schema comment: {e}")))?;
        Ok(())
    }

    pub async fn get_project_comment(
        &self,
        schema: &str,
    ) -> Result<Option<ProjectComment>, EngineError> {
        let row = self
            .client
            .query_one(
                "SELECT obj_description(oid, 'pg_namespace') FROM pg_namespace WHERE nspname = $1",
                &[&schema],
            )
            .await
            .map_err(|e| EngineError::rdb(schema, format!("failed to read schema comment: {e}")))?;
        let raw: Option<String> = row.get(0);
        Ok(raw.and_then(|text| serde_json::from_str(&text).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_tls_honors_sslmode() {
        assert!(wants_tls("host=localhost dbname=x sslmode=require"));
        assert!(wants_tls("host=localhost dbname=x sslmode=verify-full"));
        assert!(!wants_tls("host=localhost dbname=x sslmode=disable"));
        assert!(!wants_tls("host=localhost dbname=x"));
    }

    #[test]
    fn quotes_identifiers_with_special_characters() {
        assert_eq!(quote_ident("simple"), "\"simple\"");
        assert_eq!(quote_ident("my project"), "\"my project\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn comment_round_trips_through_json() {
        let id = uuid::Uuid::new_v4();
        let comment = ProjectComment::new("workspace/proj", "v3").with_project_id(id);
        let text = serde_json::to_string(&comment).unwrap();
        let back: ProjectComment = serde_json::from_str(&text).unwrap();
        assert_eq!(comment, back);
        assert!(!text.contains("\"error\""));
    }

    #[test]
    fn comment_carries_error_marker() {
        let comment = ProjectComment::new("workspace/proj", "v1").with_error("init previously failed");
        let text = serde_json::to_string(&comment).unwrap();
        assert!(text.contains("init previously failed"));
    }
}
