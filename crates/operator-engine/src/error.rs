//! Error types for the operator engine
//!
//! Three classes of failure leave this crate as `Err`:
//!
//! - domain failures (`OperatorFailed`), always tagged with the failing
//!   operator's name before they cross the crate boundary
//! - the process-control signal (`Stopped`), which unwinds a run on request
//!   and is not a user-facing error
//! - programming-error-class failures (`Macro`), raised by a corrupt process
//!   definition
//!
//! Checked setup problems (missing parameters, incompatible metadata) are
//! never errors; they are collected as [`SetupIssue`](crate::validation::SetupIssue)
//! values during the check pass.

use thiserror::Error;

use crate::macros::MacroError;
use crate::meta::DataKind;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the operator engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A computation failed. Carries the name of the failing operator.
    #[error("operator '{operator}' failed: {message}")]
    OperatorFailed { operator: String, message: String },

    /// The run was stopped on request. Unwinds execution back to the
    /// driver; logged at info level, never surfaced as a user error.
    #[error("process stopped")]
    Stopped,

    /// A second run was requested while the process was still running.
    #[error("process is already running")]
    AlreadyRunning,

    /// Operator names are unique per process.
    #[error("an operator named '{0}' already exists in this process")]
    DuplicateName(String),

    /// Lookup by operator name failed.
    #[error("no operator named '{0}' in this process")]
    UnknownOperator(String),

    /// Lookup by port name failed.
    #[error("no port '{port}' on operator '{operator}'")]
    UnknownPort { operator: String, port: String },

    /// A chain-only operation was attempted on a leaf operator.
    #[error("operator '{0}' is not a chain")]
    NotAChain(String),

    /// A chain has no unit at the given index.
    #[error("operator '{operator}' has no unit {unit}")]
    UnknownUnit { operator: String, unit: usize },

    /// Input ports accept at most one connection.
    #[error("input '{port}' on '{operator}' is already connected")]
    AlreadyConnected { operator: String, port: String },

    /// The declared kinds of the two ports cannot be wired together.
    #[error(
        "cannot wire a {produced:?} output into the {required:?} input '{port}' on '{operator}'"
    )]
    IncompatibleConnection {
        operator: String,
        port: String,
        produced: DataKind,
        required: DataKind,
    },

    /// Wiring within one execution unit must stay acyclic.
    #[error("wiring cycle detected in unit '{0}'")]
    Cycle(String),

    /// A computation asked for an input that was not delivered.
    #[error("missing required input '{port}' on operator '{operator}'")]
    MissingInput { operator: String, port: String },

    /// A computation asked for a parameter with no value and no default.
    #[error("parameter '{key}' on operator '{operator}' is not set")]
    MissingParameter { operator: String, key: String },

    /// A parameter value failed to parse as its declared type.
    #[error("parameter '{key}' on operator '{operator}': {message}")]
    InvalidParameter {
        operator: String,
        key: String,
        message: String,
    },

    /// The registry has no entry for this type tag.
    #[error("no operator type '{0}' in the registry")]
    UnknownTypeTag(String),

    /// The registry entry is metadata-only and cannot be instantiated.
    #[error("operator type '{0}' has no registered computation")]
    NoComputation(String),

    /// Macro expansion failed. Indicates a corrupt process definition.
    #[error(transparent)]
    Macro(#[from] MacroError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The driver task died outside normal error flow (panic or abort).
    #[error("execution driver error: {0}")]
    Driver(String),
}

impl EngineError {
    /// Create an operator failure with a message.
    pub fn failed(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperatorFailed {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Tag this error with the operator it came from, unless it is already
    /// tagged or is not a domain failure (stop signals and macro errors
    /// keep their own identity).
    pub fn tag(self, operator: &str) -> Self {
        match self {
            e @ (Self::OperatorFailed { .. } | Self::Stopped | Self::Macro(_)) => e,
            other => Self::OperatorFailed {
                operator: operator.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether this error is the cooperative stop signal.
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_wraps_untagged_errors() {
        let err = EngineError::MissingInput {
            operator: "filter".to_string(),
            port: "table".to_string(),
        };
        match err.tag("filter") {
            EngineError::OperatorFailed { operator, .. } => assert_eq!(operator, "filter"),
            other => panic!("expected OperatorFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_preserves_existing_tag() {
        let err = EngineError::failed("first", "boom");
        match err.tag("second") {
            EngineError::OperatorFailed { operator, .. } => assert_eq!(operator, "first"),
            other => panic!("expected OperatorFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_leaves_stop_signal_alone() {
        assert!(EngineError::Stopped.tag("anything").is_stop());
    }
}
