//! Error types for loading, indexing, and editing the graph.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{SegmentId, SynapseId};

/// Errors raised by the graph core.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A row of an edge or label file could not be parsed.
    #[error("{}:{line}: {reason}", path.display())]
    Format {
        path: PathBuf,
        /// 1-based line number of the offending row.
        line: usize,
        reason: String,
    },

    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two input records share an id.
    #[error("duplicate synapse id {0}")]
    DuplicateSynapseId(SynapseId),

    #[error("unknown synapse {0}")]
    SynapseNotFound(SynapseId),

    #[error("unknown segment {0}")]
    SegmentNotFound(SegmentId),

    #[error("nothing to undo")]
    EmptyUndoStack,

    /// The viewer's point list cannot be split into pre/post pairs, usually
    /// because one point of a pair was deleted and its partner not yet.
    #[error("{0} viewer points do not form pre/post pairs")]
    IncompleteMarkers(usize),

    /// The cross-indices disagree with each other. Always a bug.
    #[error("index invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GraphError {
    pub fn format(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        GraphError::Format {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    /// Fatal errors abort startup or the process; the rest leave the graph
    /// untouched and are only reported.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphError::Format { .. }
                | GraphError::Io { .. }
                | GraphError::DuplicateSynapseId(_)
                | GraphError::InvariantViolation(_)
                | GraphError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
