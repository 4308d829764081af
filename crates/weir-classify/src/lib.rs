//! # weir-classify
//!
//! The offline half of the weir pipeline. Consumes the controller's packet
//! snapshot files and produces the classification table the controller
//! reloads:
//!
//! ```text
//! snapshots ──▶ [flows] per-flow features ──▶ [model] class probabilities
//!                                        ──▶ [export] port override + host join
//!                                        ──▶ classification CSV (atomic replace)
//! ```
//!
//! ## Crate structure
//!
//! - [`snapshot`] — snapshot discovery and timestamp-ordered ingest
//! - [`flows`] — bidirectional flow aggregation and feature rows
//! - [`model`] — the serialised classifier blob and inference
//! - [`export`] — overrides, host join, reverse synthesis, atomic write

pub mod export;
pub mod flows;
pub mod model;
pub mod snapshot;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("unusable model: {0}")]
    Model(String),
    #[error("atomic replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl ClassifyError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ClassifyError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Exit code for the CLI surface: IO problems are 2, everything else
    /// is a configuration error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ClassifyError::Io { .. } | ClassifyError::Persist(_) => 2,
            _ => 1,
        }
    }
}
