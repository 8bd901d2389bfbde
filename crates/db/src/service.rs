use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use expensa_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use expensa_core::domain::decision::{ApprovalDecision, DecisionStatus, Verdict};
use expensa_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expensa_core::domain::user::{User, UserId};
use expensa_core::errors::{ApplicationError, DomainError, WorkflowError};
use expensa_core::workflow::{DecisionOutcome, ExpenseWorkflow, WorkflowEngine};

use crate::locks::ExpenseLocks;
use crate::repositories::{
    ApprovalQueueItem, ApprovalRuleRepository, ApprovalStats, DirectoryRepository,
    ExpenseWorkflowRepository, Page, RepositoryError, SqlApprovalRuleRepository,
    SqlDirectoryRepository, SqlExpenseWorkflowRepository,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    pub fn class(&self) -> &'static str {
        match self {
            Self::Workflow(error) => error.class(),
            Self::Domain(_) => "invalid_input",
            Self::Repository(_) => "persistence",
        }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Workflow(error) => Self::Workflow(error),
            ServiceError::Domain(error) => Self::Domain(error),
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Persisted approval workflow. Wraps the pure [`WorkflowEngine`] with
/// repository access, a per-expense lock, tracing and audit events.
pub struct ApprovalService {
    directory: Arc<dyn DirectoryRepository>,
    rules: Arc<dyn ApprovalRuleRepository>,
    expenses: Arc<dyn ExpenseWorkflowRepository>,
    audit: Arc<dyn AuditSink>,
    engine: WorkflowEngine,
    locks: ExpenseLocks,
}

impl ApprovalService {
    pub fn new(
        directory: Arc<dyn DirectoryRepository>,
        rules: Arc<dyn ApprovalRuleRepository>,
        expenses: Arc<dyn ExpenseWorkflowRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            directory,
            rules,
            expenses,
            audit,
            engine: WorkflowEngine::new(),
            locks: ExpenseLocks::new(),
        }
    }

    pub fn sqlite(pool: DbPool, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(
            Arc::new(SqlDirectoryRepository::new(pool.clone())),
            Arc::new(SqlApprovalRuleRepository::new(pool.clone())),
            Arc::new(SqlExpenseWorkflowRepository::new(pool)),
            audit,
        )
    }

    /// Routes a new pending expense and stores it with its ledger. Nothing is
    /// stored when no approver can be resolved.
    pub async fn submit_expense(
        &self,
        expense: Expense,
    ) -> Result<Vec<ApprovalDecision>, ServiceError> {
        let correlation_id = new_correlation_id();
        expense.validate()?;

        let submitter = self.submitter(&expense.submitted_by).await?;
        let rules = self.rules.list_active(&expense.company_id).await?;

        let audit = AuditContext::new(
            Some(expense.id.clone()),
            correlation_id.as_str(),
            expense.submitted_by.0.as_str(),
        );
        let ledger = self
            .engine
            .open_with_audit(
                &expense,
                &submitter.as_submitter(),
                &rules,
                Utc::now(),
                self.audit.as_ref(),
                &audit,
            )
            .map_err(|error| {
                warn!(
                    event_name = "expense.submit.refused",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    error_class = error.class(),
                    "expense could not be routed"
                );
                error
            })?;

        let workflow = ExpenseWorkflow { expense, ledger };
        self.expenses.create(&workflow).await?;
        self.engine.audit_opened(&workflow.ledger, self.audit.as_ref(), &audit);

        info!(
            event_name = "expense.submitted",
            correlation_id = %correlation_id,
            expense_id = %workflow.expense.id,
            rule_id = workflow
                .ledger
                .policy()
                .rule_id
                .as_ref()
                .map(|id| id.0.as_str())
                .unwrap_or("manager_fallback"),
            approvers = workflow.ledger.decisions().len(),
            "expense submitted for approval"
        );
        Ok(workflow.ledger.into_decisions())
    }

    /// Records one verdict and persists the re-evaluated expense status.
    pub async fn decide(
        &self,
        expense_id: &ExpenseId,
        approver_id: &UserId,
        verdict: Verdict,
        comments: Option<&str>,
    ) -> Result<DecisionOutcome, ServiceError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(expense_id).await;

        let workflow = self.workflow(expense_id).await?;
        let audit = AuditContext::new(
            Some(expense_id.clone()),
            correlation_id.as_str(),
            approver_id.0.as_str(),
        );
        let outcome = self
            .engine
            .decide_with_audit(
                &workflow,
                approver_id,
                verdict,
                comments,
                Utc::now(),
                self.audit.as_ref(),
                &audit,
            )
            .map_err(|error| {
                warn!(
                    event_name = "workflow.decision.refused",
                    correlation_id = %correlation_id,
                    expense_id = %expense_id,
                    approver_id = %approver_id,
                    error_class = error.class(),
                    "approval decision refused"
                );
                error
            })?;

        if let Err(error) = self.expenses.commit_decision(&outcome).await {
            return Err(self.commit_failed(expense_id, Some(approver_id), &audit, error).await);
        }
        self.engine.audit_decided(&outcome, self.audit.as_ref(), &audit);

        info!(
            event_name = "workflow.decision.recorded",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            approver_id = %approver_id,
            decision = outcome.decision.status.as_str(),
            expense_status = outcome.expense.status.as_str(),
            "approval decision recorded"
        );
        if outcome.transitioned_from.is_some() {
            info!(
                event_name = "workflow.expense.resolved",
                correlation_id = %correlation_id,
                expense_id = %expense_id,
                expense_status = outcome.expense.status.as_str(),
                "expense reached a terminal status"
            );
        }
        Ok(outcome)
    }

    /// Owner withdrawal of a pending expense.
    pub async fn cancel(
        &self,
        expense_id: &ExpenseId,
        owner_id: &UserId,
    ) -> Result<Expense, ServiceError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(expense_id).await;

        let workflow = self.workflow(expense_id).await?;
        let audit = AuditContext::new(
            Some(expense_id.clone()),
            correlation_id.as_str(),
            owner_id.0.as_str(),
        );
        let cancelled = self.engine.cancel_with_audit(
            &workflow,
            owner_id,
            Utc::now(),
            self.audit.as_ref(),
            &audit,
        )?;

        if let Err(error) = self.expenses.commit_cancel(&cancelled).await {
            return Err(self.commit_failed(expense_id, None, &audit, error).await);
        }
        self.engine.audit_cancelled(self.audit.as_ref(), &audit);

        info!(
            event_name = "workflow.expense.cancelled",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            "expense cancelled by its owner"
        );
        Ok(cancelled)
    }

    /// Owner removal of a pending expense and its ledger.
    pub async fn delete(
        &self,
        expense_id: &ExpenseId,
        owner_id: &UserId,
    ) -> Result<(), ServiceError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(expense_id).await;

        let workflow = self.workflow(expense_id).await?;
        let audit = AuditContext::new(
            Some(expense_id.clone()),
            correlation_id.as_str(),
            owner_id.0.as_str(),
        );
        self.engine.delete_with_audit(&workflow, owner_id, self.audit.as_ref(), &audit)?;

        if let Err(error) = self.expenses.delete_pending(expense_id, owner_id).await {
            return Err(self.commit_failed(expense_id, None, &audit, error).await);
        }
        self.engine.audit_deleted(&workflow, self.audit.as_ref(), &audit);

        info!(
            event_name = "workflow.expense.deleted",
            correlation_id = %correlation_id,
            expense_id = %expense_id,
            decisions_removed = workflow.ledger.decisions().len(),
            "expense deleted by its owner"
        );
        Ok(())
    }

    /// Active directory user allowed to file expenses.
    pub async fn submitter(&self, user_id: &UserId) -> Result<User, ServiceError> {
        self.directory
            .find_user(user_id)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| WorkflowError::not_found("submitter", user_id.0.clone()).into())
    }

    pub async fn workflow(&self, expense_id: &ExpenseId) -> Result<ExpenseWorkflow, ServiceError> {
        self.expenses
            .load(expense_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("expense", expense_id.0.clone()).into())
    }

    pub async fn expenses_of(
        &self,
        submitter_id: &UserId,
        page: Page,
    ) -> Result<Vec<Expense>, ServiceError> {
        Ok(self.expenses.list_for_submitter(submitter_id, page).await?)
    }

    pub async fn pending_for(
        &self,
        approver_id: &UserId,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, ServiceError> {
        Ok(self.expenses.list_pending_for(approver_id, page).await?)
    }

    pub async fn history_for(
        &self,
        approver_id: &UserId,
        status: Option<DecisionStatus>,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, ServiceError> {
        Ok(self.expenses.history_for(approver_id, status, page).await?)
    }

    pub async fn stats_for(&self, approver_id: &UserId) -> Result<ApprovalStats, ServiceError> {
        Ok(self.expenses.stats_for(approver_id).await?)
    }

    /// Turns a lost write race into the workflow error the caller would have
    /// seen had it arrived second.
    async fn commit_failed(
        &self,
        expense_id: &ExpenseId,
        approver_id: Option<&UserId>,
        audit: &AuditContext,
        error: RepositoryError,
    ) -> ServiceError {
        self.audit.emit(
            audit
                .event("persistence.commit_failed", AuditCategory::Persistence, AuditOutcome::Failed)
                .with_metadata("error", error.to_string()),
        );
        warn!(
            event_name = "persistence.commit_failed",
            correlation_id = %audit.correlation_id,
            expense_id = %expense_id,
            error = %error,
            "workflow commit failed"
        );

        if !matches!(error, RepositoryError::Conflict(_)) {
            return error.into();
        }
        let current = match self.expenses.load(expense_id).await {
            Ok(Some(current)) => current,
            _ => return error.into(),
        };

        if let Some(decided) =
            approver_id.and_then(|id| current.ledger.find(id)).filter(|d| !d.is_pending())
        {
            return WorkflowError::AlreadyDecided {
                expense_id: expense_id.clone(),
                approver_id: decided.approver_id.clone(),
                status: decided.status,
            }
            .into();
        }
        if current.expense.status != ExpenseStatus::Pending {
            return WorkflowError::InvariantViolation {
                expense_id: expense_id.clone(),
                status: current.expense.status,
                reason: "expense was resolved concurrently".to_string(),
            }
            .into();
        }
        error.into()
    }
}

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}
