//! Error types for the linking passes.
//!
//! Expected multiplicities (zero, one or several candidate links for a spot)
//! are ordinary control flow and never show up here. Only malformed settings,
//! solver failures and worker interruption abort a pass.

use crate::types::{Frame, SpotId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for the linking library
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors reported by an [`crate::assignment::AssignmentSolver`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The matrix handed to the solver is malformed (bad index, NaN cost, ...)
    #[error("invalid cost matrix: {0}")]
    InvalidMatrix(String),

    /// The solver could not produce an assignment
    #[error("{0}")]
    Failed(String),
}

impl SolverError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMatrix(msg.into())
    }

    pub fn failed<S: Into<String>>(msg: S) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors that abort a linking pass.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Solver message, propagated verbatim
    #[error("{0}")]
    Solver(#[from] SolverError),

    #[error("linking tasks did not complete within {timeout:?} ({pending} of {total} pending)")]
    Timeout {
        timeout: Duration,
        pending: usize,
        total: usize,
    },

    #[error("linking interrupted: {0}")]
    Interrupted(String),

    #[error("could not build worker pool: {0}")]
    ThreadPool(String),

    #[error("invalid edge {source_spot} -> {target_spot}: {reason}")]
    InvalidEdge {
        source_spot: SpotId,
        target_spot: SpotId,
        reason: String,
    },

    #[error("cannot link objects of frame {prev_frame} to frame {next_frame}: {reason}")]
    InvalidFrames {
        prev_frame: Frame,
        next_frame: Frame,
        reason: String,
    },
}

impl LinkError {
    pub fn setting<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn interrupted<S: Into<String>>(msg: S) -> Self {
        Self::Interrupted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_error_names_key() {
        let err = LinkError::setting("max_frame_gap", "missing");
        let msg = err.to_string();
        assert!(msg.contains("max_frame_gap"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn solver_message_is_verbatim() {
        let err: LinkError = SolverError::failed("matrix is infeasible").into();
        assert_eq!(err.to_string(), "matrix is infeasible");
        assert!(matches!(err, LinkError::Solver(_)));
    }
}
