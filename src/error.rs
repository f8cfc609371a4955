//! Error types for the emitter

use std::path::PathBuf;

use thiserror::Error;

/// Result type for emitter operations
pub type Result<T> = std::result::Result<T, EmitError>;

/// Emitter errors
///
/// Authoring mistakes never show up here; they are reported through
/// [`crate::diagnostics::Diagnostics`] instead.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Unresolved reference '{reference}' in {context}")]
    UnresolvedReference { reference: String, context: String },

    #[error("Duplicate declaration: {0}")]
    DuplicateDeclaration(String),

    #[error("Invalid argument for @{annotation}: {reason}")]
    InvalidArgument { annotation: String, reason: String },
}

impl EmitError {
    /// Wrap an IO error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_argument(annotation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            annotation: annotation.to_string(),
            reason: reason.into(),
        }
    }
}
