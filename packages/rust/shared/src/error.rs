//! Error types for ConceptGraph.
//!
//! Library crates use [`ConceptGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::JobStatus;

/// Top-level error type for all ConceptGraph operations.
#[derive(Debug, thiserror::Error)]
pub enum ConceptGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// One extraction channel failed. Recoverable: the channel contributes nothing.
    #[error("extraction error ({channel}): {message}")]
    Extraction { channel: String, message: String },

    /// The generation service call failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// The generation service answered with something that is not a JSON object.
    #[error("model generated invalid JSON: {0}")]
    InvalidGeneratedOutput(String),

    /// The hierarchy repair pass hit a structural anomaly.
    #[error("hierarchy repair error: {0}")]
    Repair(String),

    /// A graph store write failed; nodes written before it stay in place.
    #[error("graph write failed at node {node_id}: {message}")]
    GraphWrite { node_id: String, message: String },

    /// No ingestion job with this id.
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// The job already reached a terminal status and cannot change.
    #[error("job {id} is already {status}")]
    JobAlreadyTerminal { id: String, status: JobStatus },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ConceptGraphError>;

impl ConceptGraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an extraction error tagged with the failing channel.
    pub fn extraction(channel: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Create a graph write error for the node being written.
    pub fn graph_write(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::GraphWrite {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Lifecycle bookkeeping errors are reported to the caller but are not
    /// processing failures of a job.
    pub fn is_lifecycle_report(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound { .. } | Self::JobAlreadyTerminal { .. }
        )
    }
}
