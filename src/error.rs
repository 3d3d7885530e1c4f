//! Error types for the request lifecycle engine.
//!
//! Every fallible operation in the crate returns [`ReqflowError`]. Variants
//! carry the request id, step id, or attempted state that a caller needs to
//! build a response without re-querying.

use thiserror::Error;
use uuid::Uuid;

use crate::StepState;

/// The main error type for reqflow operations.
///
/// This enum uses `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking backward compatibility.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReqflowError {
    /// A step id was looked up that does not exist in the workflow graph.
    #[error("Unknown workflow step: {0}")]
    UnknownStep(String),

    /// The current step cannot be completed from its present state.
    #[error("Invalid workflow state: step '{step_id}' is {state:?}, expected Pending")]
    InvalidWorkflowState {
        /// The step that was asked to complete.
        step_id: String,
        /// The state the step was actually in.
        state: StepState,
    },

    /// The request does not exist in the store.
    #[error("Request not found: {0}")]
    RequestNotFound(Uuid),

    /// The command is not valid for the request's lifecycle state.
    #[error("Invalid operation on request {request_id}: {message}")]
    InvalidOperation {
        /// The request the command targeted.
        request_id: Uuid,
        /// Why the command was refused.
        message: String,
    },

    /// An approval pre-check vetoed the transition. No state was changed.
    #[error("Approval of step '{step_id}' on request {request_id} was vetoed: {reason}")]
    ValidationVeto {
        /// The request being approved.
        request_id: Uuid,
        /// The step that would have been completed.
        step_id: String,
        /// The validator's reason.
        reason: String,
    },

    /// An external collaborator (org chart, department service) failed.
    #[error("Integration failure: {0}")]
    Integration(String),

    /// The request was modified by another writer since it was loaded.
    #[error("Concurrency conflict on request {request_id}: expected version {expected}, found {found}")]
    Conflict {
        /// The request that was being saved.
        request_id: Uuid,
        /// The version the writer loaded.
        expected: u64,
        /// The version currently stored.
        found: u64,
    },

    /// A workflow definition or persisted workflow is malformed.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// The store failed outside of the database itself (task join, corrupt row).
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error (for SQLite store).
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(String),
}

impl ReqflowError {
    /// Returns true if the caller may reload state and retry the command.
    ///
    /// Only optimistic-concurrency conflicts are retryable; every other
    /// variant requires the caller to change its input or re-fetch state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Shorthand for [`ReqflowError::InvalidOperation`].
    pub(crate) fn invalid_operation(request_id: Uuid, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            request_id,
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for reqflow operations.
pub type Result<T> = std::result::Result<T, ReqflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unknown_step() {
        let error = ReqflowError::UnknownStep("review".to_string());
        assert_eq!(error.to_string(), "Unknown workflow step: review");
    }

    #[test]
    fn test_error_display_invalid_workflow_state() {
        let error = ReqflowError::InvalidWorkflowState {
            step_id: "approval".to_string(),
            state: StepState::Approved,
        };
        assert_eq!(
            error.to_string(),
            "Invalid workflow state: step 'approval' is Approved, expected Pending"
        );
    }

    #[test]
    fn test_error_display_request_not_found() {
        let id = Uuid::nil();
        let error = ReqflowError::RequestNotFound(id);
        assert_eq!(error.to_string(), format!("Request not found: {id}"));
    }

    #[test]
    fn test_error_display_veto_carries_context() {
        let id = Uuid::new_v4();
        let error = ReqflowError::ValidationVeto {
            request_id: id,
            step_id: "proposal".to_string(),
            reason: "no person proposed".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains(&id.to_string()));
        assert!(text.contains("proposal"));
        assert!(text.contains("no person proposed"));
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        let conflict = ReqflowError::Conflict {
            request_id: Uuid::nil(),
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_retryable());
        assert!(!ReqflowError::RequestNotFound(Uuid::nil()).is_retryable());
        assert!(!ReqflowError::Integration("down".to_string()).is_retryable());
    }

    #[test]
    fn test_invalid_operation_helper() {
        let error = ReqflowError::invalid_operation(Uuid::nil(), "workflow not initialized");
        assert!(matches!(error, ReqflowError::InvalidOperation { .. }));
        assert!(error.to_string().contains("workflow not initialized"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: ReqflowError = json_error.into();
        assert!(error.to_string().contains("Serialization error"));
    }
}
