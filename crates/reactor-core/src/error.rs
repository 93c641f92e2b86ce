//! Error types for reactor-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::CellId;

/// Result type for reactor-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reactor-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Cell not found in the registry.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// The dependency graph contains a cycle. Indicates a bug in graph
    /// maintenance or an analyzer reporting inconsistent names.
    #[error("cyclic dependency detected: {}", format_cycle(.0))]
    CycleDetected(Vec<CellId>),

    /// A blocking input read got no response in time.
    #[error("no response to input request {request_id} within {timeout_ms} ms")]
    InputTimeout { request_id: u64, timeout_ms: u64 },

    /// Execution was interrupted by an external request.
    #[error("execution interrupted")]
    Interrupted,

    /// An input response referenced a request that is not outstanding.
    #[error("no outstanding input request with id {0}")]
    UnknownInputRequest(u64),

    /// The kernel thread is gone (shut down or panicked).
    #[error("kernel is not running")]
    KernelUnavailable,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(cells: &[CellId]) -> String {
    let mut names: Vec<&str> = cells.iter().map(CellId::as_str).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" → ")
}

/// Classification of a cell-level failure, as reported on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Code could not be statically analyzed; the cell was not executed.
    AnalysisError,
    /// The cell body raised.
    RuntimeError,
    /// The cell was not executed because an ancestor failed.
    SkippedDueToAncestorFailure,
    /// Execution stopped by external cancellation.
    Interrupted,
    /// Internal invariant violation in the dependency graph.
    CycleDetected,
    /// A blocking input read exceeded its configured bound.
    InputTimeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::AnalysisError => "AnalysisError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::SkippedDueToAncestorFailure => "SkippedDueToAncestorFailure",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::CycleDetected => "CycleDetected",
            ErrorKind::InputTimeout => "InputTimeout",
        };
        f.write_str(name)
    }
}

/// A failure raised while executing a cell body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFailure {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Innermost frame last.
    pub traceback: Vec<String>,
}

impl CellFailure {
    /// Create a failure with an empty traceback.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// A `RuntimeError` failure.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    /// Append a frame to the traceback.
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.traceback.push(frame.into());
        self
    }
}

impl std::fmt::Display for CellFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<Error> for CellFailure {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InputTimeout { .. } => ErrorKind::InputTimeout,
            Error::Interrupted => ErrorKind::Interrupted,
            _ => ErrorKind::RuntimeError,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = Error::CycleDetected(vec![CellId::new("a"), CellId::new("b")]);
        assert_eq!(err.to_string(), "cyclic dependency detected: a → b → a");
    }

    #[test]
    fn test_failure_from_error_keeps_kind() {
        let timeout = CellFailure::from(Error::InputTimeout {
            request_id: 3,
            timeout_ms: 50,
        });
        assert_eq!(timeout.kind, ErrorKind::InputTimeout);

        let interrupted = CellFailure::from(Error::Interrupted);
        assert_eq!(interrupted.kind, ErrorKind::Interrupted);

        let other = CellFailure::from(Error::UnknownInputRequest(9));
        assert_eq!(other.kind, ErrorKind::RuntimeError);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SkippedDueToAncestorFailure).unwrap();
        assert_eq!(json, "\"skipped_due_to_ancestor_failure\"");
    }
}
