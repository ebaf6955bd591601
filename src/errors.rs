//! Error types for the lifecycle core

use thiserror::Error;

/// Errors that can occur in the event bus, phase engine, or synchronization layer
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Per-kind listener cap reached
    #[error("Max listeners exceeded for {kind}: cap is {max}")]
    MaxListenersExceeded {
        /// Event kind whose registry is full
        kind: String,
        /// The configured per-kind cap
        max: usize,
    },

    /// Operation attempted after shutdown began
    #[error("Shutdown in progress: {operation} rejected")]
    ShutdownInProgress {
        /// The operation that was rejected
        operation: String,
    },

    /// Invalid phase/state transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// Project not found
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Meeting not found within a project
    #[error("Meeting not found: {meeting_id} in project {project_id}")]
    MeetingNotFound {
        /// The meeting searched for
        meeting_id: String,
        /// The owning project
        project_id: String,
    },

    /// Schedule entry could not be translated into a meeting (or vice versa)
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Generic core error
    #[error("Core error: {0}")]
    Generic(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl CoreError {
    /// Create a generic core error
    pub fn generic(msg: impl Into<String>) -> Self {
        CoreError::Generic(msg.into())
    }

    /// Configuration errors indicate programmer error at the call site,
    /// not transient failure
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CoreError::MaxListenersExceeded { .. } | CoreError::ShutdownInProgress { .. }
        )
    }

    /// Errors that a sync batch skips and logs rather than propagating
    pub fn is_recoverable_sync_error(&self) -> bool {
        matches!(
            self,
            CoreError::ProjectNotFound(_)
                | CoreError::MeetingNotFound { .. }
                | CoreError::ConversionError(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::ProjectNotFound(_) | CoreError::MeetingNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = CoreError::MaxListenersExceeded {
            kind: "PhaseChanged".to_string(),
            max: 100,
        };
        assert_eq!(
            err.to_string(),
            "Max listeners exceeded for PhaseChanged: cap is 100"
        );

        let err = CoreError::ShutdownInProgress {
            operation: "subscribe".to_string(),
        };
        assert_eq!(err.to_string(), "Shutdown in progress: subscribe rejected");

        let err = CoreError::InvalidStateTransition {
            from: "Planning".to_string(),
            to: "ContractPending".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Planning to ContractPending"
        );

        let err = CoreError::ProjectNotFound("PRJ-404".to_string());
        assert_eq!(err.to_string(), "Project not found: PRJ-404");

        let err = CoreError::ConversionError("missing scheduled date".to_string());
        assert_eq!(err.to_string(), "Conversion error: missing scheduled date");
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::MaxListenersExceeded {
            kind: "x".to_string(),
            max: 1,
        }
        .is_config_error());
        assert!(CoreError::ShutdownInProgress {
            operation: "emit".to_string(),
        }
        .is_config_error());
        assert!(!CoreError::Generic("x".to_string()).is_config_error());

        assert!(CoreError::ProjectNotFound("p".to_string()).is_recoverable_sync_error());
        assert!(CoreError::ConversionError("c".to_string()).is_recoverable_sync_error());
        assert!(!CoreError::ShutdownInProgress {
            operation: "emit".to_string(),
        }
        .is_recoverable_sync_error());

        assert!(CoreError::MeetingNotFound {
            meeting_id: "m".to_string(),
            project_id: "p".to_string(),
        }
        .is_not_found());
        assert!(!CoreError::ValidationError("v".to_string()).is_not_found());
    }

    #[test]
    fn test_serde_json_conversion() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{ nope }").unwrap_err();
        let core_err: CoreError = serde_err.into();
        match core_err {
            CoreError::SerializationError(msg) => assert!(!msg.is_empty()),
            other => panic!("expected SerializationError, got {other:?}"),
        }
    }

    #[test]
    fn test_all_errors_clone() {
        let errors: Vec<CoreError> = vec![
            CoreError::MaxListenersExceeded {
                kind: "k".to_string(),
                max: 100,
            },
            CoreError::ShutdownInProgress {
                operation: "emit".to_string(),
            },
            CoreError::InvalidStateTransition {
                from: "A".to_string(),
                to: "B".to_string(),
            },
            CoreError::ProjectNotFound("p".to_string()),
            CoreError::MeetingNotFound {
                meeting_id: "m".to_string(),
                project_id: "p".to_string(),
            },
            CoreError::ConversionError("c".to_string()),
            CoreError::SerializationError("s".to_string()),
            CoreError::ValidationError("v".to_string()),
            CoreError::Generic("g".to_string()),
            CoreError::InternalError("i".to_string()),
        ];

        for error in errors {
            let cloned = error.clone();
            assert_eq!(error.to_string(), cloned.to_string());
        }
    }
}
