//! Crate-level error taxonomy.
//!
//! Every failure aborts the run: there is no skip-and-continue path and no
//! retry. The variants only tell the operator *what kind* of thing broke.

use thiserror::Error;

use crate::gateway::ProviderError;
use crate::tables::TableError;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Unsupported experiment type, unknown prompt style, unsupported model,
    /// empty template selection. Raised before any external call.
    #[error("configuration error: {0}")]
    Config(String),

    /// An upstream row (context question, recorded context answer) is missing.
    #[error("no row in {table} for {key}")]
    Lookup { table: &'static str, key: String },

    /// Any failure from the execution backend.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Missing or malformed input table.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Batch ids or batch output lines that do not parse.
    #[error("malformed batch data: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn lookup(table: &'static str, key: impl Into<String>) -> Self {
        Self::Lookup {
            table,
            key: key.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Short code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Lookup { .. } => "lookup_error",
            Self::Provider(e) => e.code(),
            Self::Table(_) => "table_error",
            Self::Malformed(_) => "malformed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}
