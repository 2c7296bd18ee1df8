use std::path::PathBuf;

use thiserror::Error;

/// Typed failures raised by the ledger itself.
///
/// Errors produced by a wrapped task operation never pass through this type:
/// they are handed back to the caller as the original `anyhow::Error`.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Run already exists at {}", .0.display())]
    RunCollision(PathBuf),

    #[error("Object type {0} not supported")]
    TypeNotSupported(String),

    #[error("Artifact '{id}' not found under {}", .dir.display())]
    ArtifactNotFound { id: String, dir: PathBuf },

    #[error("Could not resolve symbol {module}::{name}")]
    SymbolNotFound { module: String, name: String },

    #[error("Artifact group '{0}' already exists")]
    GroupExists(String),

    #[error("\"outputs\" and \"inputs\" are reserved artifact group names, got '{0}'")]
    ReservedGroup(String),

    #[error("Invalid artifact group name '{0}'")]
    InvalidGroup(String),

    #[error("Task '{0}' has no recorded runs")]
    NoRuns(String),

    #[error("Could not find run with run_id={run_id} for task '{task}'")]
    RunNotFound { task: String, run_id: u64 },

    #[error("{0}")]
    Bind(String),

    #[error("Task run interrupted")]
    Interrupted,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
