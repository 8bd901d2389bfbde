use thiserror::Error;

use crate::domain::decision::DecisionStatus;
use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::rule::RuleId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid expense transition from {from:?} to {to:?}")]
    InvalidExpenseTransition { from: ExpenseStatus, to: ExpenseStatus },
    #[error("approval rule `{rule_id}` is invalid: {reason}")]
    InvalidRule { rule_id: RuleId, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Business-rule failures raised by the approval workflow. None of these are
/// transient; callers must not retry them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{resource} `{key}` not found")]
    NotFound { resource: &'static str, key: String },
    #[error("approver `{approver_id}` already {} expense `{expense_id}`", .status.as_str())]
    AlreadyDecided { expense_id: ExpenseId, approver_id: UserId, status: DecisionStatus },
    #[error("comments are required when rejecting an expense")]
    CommentRequired,
    #[error("no approval rule matched expense `{expense_id}` and submitter `{submitter_id}` has no manager")]
    NoApplicablePolicy { expense_id: ExpenseId, submitter_id: UserId },
    #[error("expense `{expense_id}` is {}: {reason}", .status.as_str())]
    InvariantViolation { expense_id: ExpenseId, status: ExpenseStatus, reason: String },
    #[error("approver `{approver_id}` must wait for `{waiting_on}` on expense `{expense_id}`")]
    OutOfSequence { expense_id: ExpenseId, approver_id: UserId, waiting_on: UserId },
}

impl WorkflowError {
    pub fn not_found(resource: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound { resource, key: key.into() }
    }

    /// Stable machine-readable class used in CLI output and audit metadata.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::CommentRequired => "comment_required",
            Self::NoApplicablePolicy { .. } => "no_applicable_policy",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::OutOfSequence { .. } => "out_of_sequence",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested expense or approval does not exist.",
            Self::Conflict { .. } => "This expense has already been processed.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Workflow(error) => match error {
                WorkflowError::NotFound { .. } => {
                    Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
                }
                WorkflowError::AlreadyDecided { .. }
                | WorkflowError::InvariantViolation { .. }
                | WorkflowError::OutOfSequence { .. } => {
                    Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
                }
                WorkflowError::CommentRequired | WorkflowError::NoApplicablePolicy { .. } => {
                    Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
                }
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::decision::DecisionStatus;
    use crate::domain::expense::ExpenseId;
    use crate::domain::user::UserId;
    use crate::errors::{ApplicationError, DomainError, InterfaceError, WorkflowError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(DomainError::InvariantViolation("empty title".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn already_decided_maps_to_conflict() {
        let interface = ApplicationError::from(WorkflowError::AlreadyDecided {
            expense_id: ExpenseId("EXP-1".to_owned()),
            approver_id: UserId("u-mgr".to_owned()),
            status: DecisionStatus::Approved,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.user_message(), "This expense has already been processed.");
    }

    #[test]
    fn missing_decision_maps_to_not_found() {
        let interface =
            ApplicationError::from(WorkflowError::not_found("approval decision", "EXP-1/u-x"))
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::NotFound { ref message, .. }
            if message.contains("approval decision `EXP-1/u-x` not found")));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn workflow_errors_expose_stable_classes() {
        assert_eq!(WorkflowError::CommentRequired.class(), "comment_required");
        assert_eq!(WorkflowError::not_found("expense", "EXP-9").class(), "not_found");
    }
}
