//! Error taxonomy and password redaction.
//!
//! Every fallible operation in the engine returns [`EngineError`]; callers
//! that only care about "did this work" compose it into `anyhow::Error`
//! via `?` the way the rest of the crate does. Callers that need to branch
//! on failure class (the orchestrator deciding whether to retry a cycle)
//! match on the variant instead of parsing a message.

use std::fmt;

/// A connection string whose password never appears in its `Display`/`Debug`
/// form. This is the type-level redaction called for in DESIGN.md: there is
/// no method on this type that returns the raw password-bearing DSN, so no
/// call site can accidentally leak it into a log line or error string.
#[derive(Clone)]
pub struct ConnInfo(String);

const REDACTED: &str = "password=***";

impl ConnInfo {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw DSN, for handing to the Postgres driver only. Never log or
    /// print the result of this call.
    pub fn as_raw(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();
        loop {
            match rest.find("password=") {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some(idx) => {
                    out.push_str(&rest[..idx]);
                    out.push_str(REDACTED);
                    let after = &rest[idx + "password=".len()..];
                    let skip = match after.chars().next() {
                        Some(q @ ('\'' | '"')) => after[1..]
                            .find(q)
                            .map(|end| end + 2)
                            .unwrap_or(after.len()),
                        _ => after.find(' ').unwrap_or(after.len()),
                    };
                    rest = &after[skip.min(after.len())..];
                }
            }
        }
        out
    }
}

impl fmt::Display for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnInfo").field(&self.redacted()).finish()
    }
}

/// One of the six error tags from the error handling design. `source`
/// chains keep the underlying cause (a Postgres error, an I/O error, a
/// geodiff stderr capture) so `anyhow::Error::context` keeps working on
/// top of these.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("remote error ({project}): {message}")]
    Remote { project: String, message: String },

    #[error("geodiff failed: {argv:?}\n{stderr}")]
    DiffTool { argv: Vec<String>, stderr: String },

    #[error("database error ({project}): {message}")]
    Rdb { project: String, message: String },

    #[error("state error ({project}): {message}. Run with --force-init to recover.")]
    State { project: String, message: String },

    #[error(
        "project ID mismatch for '{project}': local={local} server={server}. \
         The server project was likely deleted and recreated; run --force-init."
    )]
    ProjectIdMismatch {
        project: String,
        local: uuid::Uuid,
        server: uuid::Uuid,
    },
}

impl EngineError {
    pub fn is_retryable_in_loop(&self) -> bool {
        matches!(self, EngineError::Remote { .. })
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn remote(project: impl Into<String>, msg: impl Into<String>) -> Self {
        EngineError::Remote {
            project: project.into(),
            message: msg.into(),
        }
    }

    pub fn rdb(project: impl Into<String>, msg: impl Into<String>) -> Self {
        EngineError::Rdb {
            project: project.into(),
            message: msg.into(),
        }
    }

    pub fn state(project: impl Into<String>, msg: impl Into<String>) -> Self {
        EngineError::State {
            project: project.into(),
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_quoted_password() {
        let c = ConnInfo::new("host=localhost dbname=x user=u password='s3cr3t' sslmode=require");
        assert_eq!(
            c.to_string(),
            "host=localhost dbname=x user=u password=*** sslmode=require"
        );
    }

    #[test]
    fn redacts_unquoted_password() {
        let c = ConnInfo::new("host=localhost password=s3cr3t dbname=x");
        assert_eq!(c.to_string(), "host=localhost password=*** dbname=x");
    }

    #[test]
    fn leaves_passwordless_dsn_untouched() {
        let c = ConnInfo::new("host=localhost dbname=x");
        assert_eq!(c.to_string(), "host=localhost dbname=x");
    }

    #[test]
    fn retry_policy_matches_taxonomy() {
        let remote = EngineError::remote("ws/proj", "timeout");
        let state = EngineError::state("ws/proj", "mismatch");
        assert!(remote.is_retryable_in_loop());
        assert!(!state.is_retryable_in_loop());
    }
}
