//! Error taxonomy for the hybrid-search core.
//!
//! Every error kind named by the RPC boundary's error envelope (`ErrorKind`)
//! has exactly one matching `Error` variant. `Error` never swallows the
//! originating SQL error or JSON error — both are carried via `#[from]` so
//! callers never have to choose between a typed kind and a useful message.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Machine-readable error kind, stable across the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    DocumentInsert,
    Schema,
    IndexCorruption,
    Database,
    Timeout,
    Transport,
    Resource,
}

/// The crate's error type. Construct via the helper constructors rather
/// than the variants directly where one exists, so the structured context
/// fields stay consistent.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("insert into collection `{collection}` failed for document `{id}`: {suggestion}")]
    DocumentInsert {
        collection: String,
        id: String,
        suggestion: String,
    },

    #[error("schema error: {message} (required action: {required_action})")]
    Schema {
        message: String,
        required_action: String,
    },

    #[error(
        "FTS index corruption in collection `{collection}`: {docs_count} documents, {fts_count} FTS rows"
    )]
    IndexCorruption {
        collection: String,
        docs_count: i64,
        fts_count: i64,
    },

    #[error("database error running `{sql_snippet}` ({param_count} bound params): {message}")]
    Database {
        message: String,
        sql_snippet: String,
        param_count: usize,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("RPC transport failure: {0}")]
    Transport(String),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn document_insert(
        collection: impl Into<String>,
        id: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Error::DocumentInsert {
            collection: collection.into(),
            id: id.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn schema(message: impl Into<String>, required_action: impl Into<String>) -> Self {
        Error::Schema {
            message: message.into(),
            required_action: required_action.into(),
        }
    }

    pub fn index_corruption(collection: impl Into<String>, docs_count: i64, fts_count: i64) -> Self {
        Error::IndexCorruption {
            collection: collection.into(),
            docs_count,
            fts_count,
        }
    }

    /// Wrap a `rusqlite::Error` with the SQL text and bound parameter count,
    /// per the C1 adapter's failure policy (never values, only the count).
    pub fn database(sql: &str, param_count: usize, source: rusqlite::Error) -> Self {
        Error::Database {
            message: source.to_string(),
            sql_snippet: snippet(sql),
            param_count,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::DocumentInsert { .. } => ErrorKind::DocumentInsert,
            Error::Schema { .. } => ErrorKind::Schema,
            Error::IndexCorruption { .. } => ErrorKind::IndexCorruption,
            Error::Database { .. } | Error::Sqlite(_) | Error::Json(_) | Error::Io(_) => {
                ErrorKind::Database
            }
            Error::Timeout => ErrorKind::Timeout,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Resource(_) => ErrorKind::Resource,
        }
    }

    /// Build the RPC-boundary error envelope for this error.
    pub fn into_envelope(self, method: &str, param_count: usize) -> ErrorEnvelope {
        let kind = self.kind();
        let sql_snippet = match &self {
            Error::Database { sql_snippet, .. } => Some(sql_snippet.clone()),
            _ => None,
        };
        ErrorEnvelope {
            kind,
            message: self.to_string(),
            details: None,
            context: ErrorContext {
                method: method.to_string(),
                param_count,
                sql_snippet,
            },
        }
    }
}

fn snippet(sql: &str) -> String {
    const MAX: usize = 200;
    let trimmed = sql.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        format!("{}...", &trimmed[..MAX])
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The structured error that crosses the RPC boundary (C5), carrying
/// enough context to diagnose a failure from the caller side without a
/// stack trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub context: ErrorContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub method: String,
    pub param_count: usize,
    pub sql_snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            Error::document_insert("c", "1", "retry").kind(),
            ErrorKind::DocumentInsert
        );
        assert_eq!(Error::Timeout.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "SELECT ".to_string() + &"x".repeat(300);
        let s = snippet(&long);
        assert!(s.ends_with("..."));
        assert!(s.len() < long.len());
    }

    #[test]
    fn test_envelope_never_carries_param_values() {
        let err = Error::database(
            "SELECT * FROM docs WHERE id = ?1",
            1,
            rusqlite::Error::QueryReturnedNoRows,
        );
        let env = err.into_envelope("select", 1);
        assert!(!env.message.contains("secret-value"));
        assert_eq!(env.context.param_count, 1);
    }
}
