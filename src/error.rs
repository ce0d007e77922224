// src/error.rs
//! Error taxonomy for one watch cycle.
//!
//! Every variant is scoped to a single source or recipient. None of them is
//! allowed to abort the batch; the orchestrator logs them and moves on.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Network or parse failure inside a source. Treated as zero records.
    #[error("source `{source_name}` failed: {reason}")]
    Source { source_name: String, reason: String },

    /// Scrape exceeded the configured timeout.
    #[error("source `{source_name}` timed out after {secs}s")]
    Timeout { source_name: String, secs: u64 },

    /// Snapshot read/write failure.
    #[error("snapshot I/O on {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Notification could not be delivered to one recipient.
    #[error("transport to {recipient} failed: {reason}")]
    Transport { recipient: String, reason: String },
}

impl WatchError {
    pub fn source_failure(name: &str, err: &anyhow::Error) -> Self {
        Self::Source {
            source_name: name.to_string(),
            reason: format!("{err:#}"),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
