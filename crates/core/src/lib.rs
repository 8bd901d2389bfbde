pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use domain::decision::{
    ApprovalDecision, DecisionId, DecisionStatus, Verdict, WorkflowPolicy,
};
pub use domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
pub use domain::rule::{AmountRange, ApprovalRule, ApproverAssignment, CategoryScope, RuleId};
pub use domain::user::{CompanyId, Submitter, User, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError, WorkflowError};
pub use workflow::{DecisionOutcome, ExpenseWorkflow, Ledger, WorkflowEngine};
