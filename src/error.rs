/* src/error.rs */

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a zone from its definition file.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid zone JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {rtype} record in label '{label}': {reason}")]
    InvalidRecord {
        label: String,
        rtype: String,
        reason: String,
    },

    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Targeting(#[from] TargetingError),

    #[error("Invalid health check in label '{label}': {source}")]
    Health {
        label: String,
        #[source]
        source: HealthError,
    },

    #[error("Cannot derive a zone origin from {0:?}")]
    MissingOrigin(PathBuf),
}

/// Errors raised while parsing a targeting specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetingError {
    #[error("Unknown targeting option '{0}'")]
    UnknownOption(String),
}

/// Errors raised while constructing a health test from its configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("Unknown health check type '{0}'")]
    UnknownType(String),

    #[error("Missing health check parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Invalid health check parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Aggregate of every per-file failure seen during one reload pass.
#[derive(Debug, Error)]
#[error("{} zone file(s) failed to load: {}", .failures.len(), summarize(.failures))]
pub struct ReloadError {
    pub failures: Vec<(PathBuf, ZoneError)>,
}

fn summarize(failures: &[(PathBuf, ZoneError)]) -> String {
    failures
        .iter()
        .map(|(path, e)| format!("{}: {}", path.display(), e))
        .collect::<Vec<_>>()
        .join("; ")
}
