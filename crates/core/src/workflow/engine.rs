use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::decision::{ApprovalDecision, Verdict};
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::rule::ApprovalRule;
use crate::domain::user::{Submitter, UserId};
use crate::errors::WorkflowError;
use crate::workflow::evaluator::{evaluate, Evaluation};
use crate::workflow::ledger::Ledger;
use crate::workflow::{matcher, resolver};

/// An expense together with its approval ledger. This is the unit that is
/// loaded, transformed and persisted atomically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseWorkflow {
    pub expense: Expense,
    pub ledger: Ledger,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub expense: Expense,
    pub decision: ApprovalDecision,
    pub ledger: Ledger,
    pub evaluation: Evaluation,
    /// The previous expense status, when this decision resolved it.
    pub transitioned_from: Option<ExpenseStatus>,
}

impl DecisionOutcome {
    pub fn expense_status(&self) -> ExpenseStatus {
        self.expense.status
    }

    pub fn into_workflow(self) -> ExpenseWorkflow {
        ExpenseWorkflow { expense: self.expense, ledger: self.ledger }
    }
}

/// Pure approval workflow. Every operation takes the current state by
/// reference and returns the next state, so a failed call leaves the caller's
/// data untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowEngine;

impl WorkflowEngine {
    pub fn new() -> Self {
        Self
    }

    /// Builds the ledger for a freshly submitted expense. The expense status is
    /// not changed here.
    pub fn open(
        &self,
        expense: &Expense,
        submitter: &Submitter,
        rules: &[ApprovalRule],
        now: DateTime<Utc>,
    ) -> Result<Ledger, WorkflowError> {
        if expense.status != ExpenseStatus::Pending {
            return Err(not_pending(expense, "only pending expenses enter the workflow"));
        }
        if submitter.user_id != expense.submitted_by || submitter.company_id != expense.company_id
        {
            return Err(WorkflowError::not_found(
                "submitter",
                format!("{} for expense {}", submitter.user_id, expense.id),
            ));
        }

        let rule = matcher::match_rule(expense, rules);
        let resolution = resolver::resolve(expense, submitter, rule)?;
        Ok(Ledger::open(expense.id.clone(), resolution, now))
    }

    /// Like [`Self::open`], emitting `workflow.ledger_refused` on failure.
    /// The success event is left to [`Self::audit_opened`] once the ledger is
    /// stored.
    pub fn open_with_audit<S>(
        &self,
        expense: &Expense,
        submitter: &Submitter,
        rules: &[ApprovalRule],
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Ledger, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        self.open(expense, submitter, rules, now).map_err(|error| {
            sink.emit(
                audit
                    .event("workflow.ledger_refused", AuditCategory::Submission, AuditOutcome::Rejected)
                    .with_metadata("error_class", error.class())
                    .with_metadata("error", error.to_string()),
            );
            error
        })
    }

    pub fn audit_opened<S>(&self, ledger: &Ledger, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            audit
                .event("workflow.ledger_opened", AuditCategory::Submission, AuditOutcome::Success)
                .with_metadata(
                    "rule_id",
                    ledger
                        .policy()
                        .rule_id
                        .as_ref()
                        .map(|id| id.0.clone())
                        .unwrap_or_else(|| "manager_fallback".to_owned()),
                )
                .with_metadata("approvers", ledger.decisions().len().to_string()),
        );
    }

    /// Records one approver's verdict and re-derives the expense status.
    pub fn decide(
        &self,
        workflow: &ExpenseWorkflow,
        approver_id: &UserId,
        verdict: Verdict,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        if workflow.ledger.find(approver_id).is_none() {
            return Err(WorkflowError::not_found(
                "approval decision",
                format!("{}/{}", workflow.expense.id, approver_id),
            ));
        }
        if let Some(existing) = workflow.ledger.find(approver_id).filter(|d| !d.is_pending()) {
            return Err(WorkflowError::AlreadyDecided {
                expense_id: workflow.expense.id.clone(),
                approver_id: approver_id.clone(),
                status: existing.status,
            });
        }
        if workflow.expense.status != ExpenseStatus::Pending {
            return Err(not_pending(&workflow.expense, "decisions are closed"));
        }

        let mut ledger = workflow.ledger.clone();
        let decision = ledger.record(approver_id, verdict, comments, now)?.clone();

        let mut expense = workflow.expense.clone();
        let evaluation = evaluate(expense.status, &ledger);
        let mut transitioned_from = None;
        if evaluation.status != expense.status {
            let previous = expense.status;
            expense
                .transition_to(evaluation.status, now)
                .map_err(|error| not_pending(&workflow.expense, &error.to_string()))?;
            transitioned_from = Some(previous);
        }

        Ok(DecisionOutcome { expense, decision, ledger, evaluation, transitioned_from })
    }

    /// Like [`Self::decide`], emitting `workflow.decision_refused` on
    /// failure. Success events come from [`Self::audit_decided`] after the
    /// outcome is committed.
    pub fn decide_with_audit<S>(
        &self,
        workflow: &ExpenseWorkflow,
        approver_id: &UserId,
        verdict: Verdict,
        comments: Option<&str>,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<DecisionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        self.decide(workflow, approver_id, verdict, comments, now).map_err(|error| {
            sink.emit(
                audit
                    .event("workflow.decision_refused", AuditCategory::Decision, AuditOutcome::Rejected)
                    .with_metadata("approver_id", approver_id.0.clone())
                    .with_metadata("error_class", error.class())
                    .with_metadata("error", error.to_string()),
            );
            error
        })
    }

    pub fn audit_decided<S>(&self, outcome: &DecisionOutcome, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            audit
                .event("workflow.decision_recorded", AuditCategory::Decision, AuditOutcome::Success)
                .with_metadata("approver_id", outcome.decision.approver_id.0.clone())
                .with_metadata("decision", outcome.decision.status.as_str())
                .with_metadata("expense_status", outcome.expense.status.as_str()),
        );
        if let Some(previous) = outcome.transitioned_from {
            sink.emit(
                audit
                    .event(
                        "workflow.expense_resolved",
                        AuditCategory::Completion,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", previous.as_str())
                    .with_metadata("to", outcome.expense.status.as_str())
                    .with_metadata("reason", format!("{:?}", outcome.evaluation.reason)),
            );
        }
    }

    /// Owner withdrawal of a pending expense.
    pub fn cancel(
        &self,
        workflow: &ExpenseWorkflow,
        owner_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Expense, WorkflowError> {
        ensure_owner(workflow, owner_id)?;

        let mut expense = workflow.expense.clone();
        expense
            .transition_to(ExpenseStatus::Cancelled, now)
            .map_err(|_| not_pending(&workflow.expense, "only pending expenses can be cancelled"))?;
        Ok(expense)
    }

    pub fn cancel_with_audit<S>(
        &self,
        workflow: &ExpenseWorkflow,
        owner_id: &UserId,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Expense, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        self.cancel(workflow, owner_id, now).map_err(|error| {
            sink.emit(
                audit
                    .event("workflow.cancel_refused", AuditCategory::Completion, AuditOutcome::Rejected)
                    .with_metadata("error_class", error.class()),
            );
            error
        })
    }

    pub fn audit_cancelled<S>(&self, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(audit.event(
            "workflow.expense_cancelled",
            AuditCategory::Completion,
            AuditOutcome::Success,
        ));
    }

    /// Owner removal of a pending expense together with its ledger. Returns
    /// the id to delete; nothing is removed here.
    pub fn delete(
        &self,
        workflow: &ExpenseWorkflow,
        owner_id: &UserId,
    ) -> Result<ExpenseId, WorkflowError> {
        ensure_owner(workflow, owner_id)?;
        if workflow.expense.status != ExpenseStatus::Pending {
            return Err(not_pending(&workflow.expense, "only pending expenses can be deleted"));
        }
        Ok(workflow.expense.id.clone())
    }

    pub fn delete_with_audit<S>(
        &self,
        workflow: &ExpenseWorkflow,
        owner_id: &UserId,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<ExpenseId, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        self.delete(workflow, owner_id).map_err(|error| {
            sink.emit(
                audit
                    .event("workflow.delete_refused", AuditCategory::Completion, AuditOutcome::Rejected)
                    .with_metadata("error_class", error.class()),
            );
            error
        })
    }

    pub fn audit_deleted<S>(&self, workflow: &ExpenseWorkflow, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            audit
                .event("workflow.expense_deleted", AuditCategory::Completion, AuditOutcome::Success)
                .with_metadata("decisions_removed", workflow.ledger.decisions().len().to_string()),
        );
    }
}

fn ensure_owner(workflow: &ExpenseWorkflow, owner_id: &UserId) -> Result<(), WorkflowError> {
    if &workflow.expense.submitted_by != owner_id {
        return Err(WorkflowError::not_found(
            "expense",
            format!("{} owned by {}", workflow.expense.id, owner_id),
        ));
    }
    Ok(())
}

fn not_pending(expense: &Expense, reason: &str) -> WorkflowError {
    WorkflowError::InvariantViolation {
        expense_id: expense.id.clone(),
        status: expense.status,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{ExpenseWorkflow, WorkflowEngine};
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::decision::{DecisionStatus, Verdict};
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use crate::domain::rule::{
        AmountRange, ApprovalRule, ApproverAssignment, CategoryScope, RuleId,
    };
    use crate::domain::user::{CompanyId, Submitter, UserId};
    use crate::errors::WorkflowError;

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn expense(amount: i64, category: ExpenseCategory) -> Expense {
        let now = Utc::now();
        Expense {
            id: ExpenseId("EXP-100".to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: user("u-emp"),
            title: "Conference trip".to_string(),
            description: None,
            amount: Decimal::new(amount, 0),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(amount, 0),
            category,
            expense_date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("valid date"),
            status: ExpenseStatus::Pending,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    fn submitter(manager: Option<&str>) -> Submitter {
        Submitter {
            user_id: user("u-emp"),
            company_id: CompanyId("acme".to_string()),
            manager_id: manager.map(user),
        }
    }

    fn travel_rule() -> ApprovalRule {
        ApprovalRule {
            id: RuleId("R-travel".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "Travel up to 10k".to_string(),
            description: None,
            amount_range: Some(AmountRange::new(Decimal::ZERO, Decimal::new(10_000, 0))),
            categories: CategoryScope::Only(vec![ExpenseCategory::Travel]),
            manager_approves_first: true,
            sequential: false,
            min_approval_percentage: None,
            priority: 0,
            active: true,
            created_by: user("u-admin"),
            approvers: vec![
                ApproverAssignment::new(user("u-a1"), 1),
                ApproverAssignment::new(user("u-a2"), 2),
            ],
        }
    }

    fn open(rules: &[ApprovalRule], manager: Option<&str>) -> ExpenseWorkflow {
        let expense = expense(500, ExpenseCategory::Travel);
        let ledger = WorkflowEngine::new()
            .open(&expense, &submitter(manager), rules, Utc::now())
            .expect("open ledger");
        ExpenseWorkflow { expense, ledger }
    }

    #[test]
    fn travel_scenario_rejects_on_last_approver() {
        let engine = WorkflowEngine::new();
        let workflow = open(&[travel_rule()], Some("u-mgr"));

        let layout: Vec<(&str, u32, bool)> = workflow
            .ledger
            .decisions()
            .iter()
            .map(|d| (d.approver_id.0.as_str(), d.sequence, d.required))
            .collect();
        assert_eq!(layout, vec![("u-mgr", 1, true), ("u-a1", 2, true), ("u-a2", 3, true)]);

        let outcome =
            engine.decide(&workflow, &user("u-mgr"), Verdict::Approve, None, Utc::now()).expect("m");
        assert_eq!(outcome.expense_status(), ExpenseStatus::Pending);
        let workflow = outcome.into_workflow();

        let outcome =
            engine.decide(&workflow, &user("u-a1"), Verdict::Approve, None, Utc::now()).expect("a1");
        assert_eq!(outcome.expense_status(), ExpenseStatus::Pending);
        let workflow = outcome.into_workflow();

        let outcome = engine
            .decide(&workflow, &user("u-a2"), Verdict::Reject, Some("no receipt"), Utc::now())
            .expect("a2");
        assert_eq!(outcome.expense_status(), ExpenseStatus::Rejected);
        assert_eq!(outcome.transitioned_from, Some(ExpenseStatus::Pending));
        assert!(outcome.expense.resolved_at.is_some());
    }

    #[test]
    fn no_rule_and_no_manager_surfaces_policy_gap() {
        let expense = expense(500, ExpenseCategory::Meals);
        let error = WorkflowEngine::new()
            .open(&expense, &submitter(None), &[travel_rule()], Utc::now())
            .expect_err("no approver configured");
        assert!(matches!(error, WorkflowError::NoApplicablePolicy { .. }));
    }

    #[test]
    fn percentage_scenario_approves_with_one_decision_outstanding() {
        let mut rule = travel_rule();
        rule.manager_approves_first = false;
        rule.min_approval_percentage = Some(60);
        rule.approvers = vec![
            ApproverAssignment::new(user("u-a1"), 1).optional(),
            ApproverAssignment::new(user("u-a2"), 2).optional(),
            ApproverAssignment::new(user("u-a3"), 3).optional(),
        ];
        let engine = WorkflowEngine::new();
        let workflow = open(&[rule], None);

        let workflow = engine
            .decide(&workflow, &user("u-a1"), Verdict::Approve, None, Utc::now())
            .expect("a1")
            .into_workflow();
        assert_eq!(workflow.expense.status, ExpenseStatus::Pending);

        let outcome =
            engine.decide(&workflow, &user("u-a3"), Verdict::Approve, None, Utc::now()).expect("a3");
        assert_eq!(outcome.expense_status(), ExpenseStatus::Approved);
        assert_eq!(
            outcome.ledger.find(&user("u-a2")).map(|d| d.status),
            Some(DecisionStatus::Pending)
        );
    }

    #[test]
    fn failed_decision_leaves_workflow_untouched() {
        let engine = WorkflowEngine::new();
        let workflow = open(&[travel_rule()], Some("u-mgr"));
        let snapshot = workflow.clone();

        let error = engine
            .decide(&workflow, &user("u-mgr"), Verdict::Reject, Some(" "), Utc::now())
            .expect_err("blank rejection");
        assert_eq!(error, WorkflowError::CommentRequired);
        assert_eq!(workflow, snapshot);
    }

    #[test]
    fn decisions_after_resolution_violate_invariant() {
        let mut rule = travel_rule();
        rule.approvers[1].required = false;
        let engine = WorkflowEngine::new();
        let workflow = open(&[rule], Some("u-mgr"));

        let workflow = engine
            .decide(&workflow, &user("u-mgr"), Verdict::Approve, None, Utc::now())
            .expect("mgr")
            .into_workflow();
        let outcome =
            engine.decide(&workflow, &user("u-a1"), Verdict::Approve, None, Utc::now()).expect("a1");
        assert_eq!(outcome.expense_status(), ExpenseStatus::Approved);
        let workflow = outcome.into_workflow();

        let error = engine
            .decide(&workflow, &user("u-a2"), Verdict::Approve, None, Utc::now())
            .expect_err("expense already approved");
        assert!(matches!(
            error,
            WorkflowError::InvariantViolation { status: ExpenseStatus::Approved, .. }
        ));
    }

    #[test]
    fn cancel_is_owner_only_and_pending_only() {
        let engine = WorkflowEngine::new();
        let workflow = open(&[travel_rule()], Some("u-mgr"));

        let error = engine.cancel(&workflow, &user("u-mgr"), Utc::now()).expect_err("not owner");
        assert!(matches!(error, WorkflowError::NotFound { .. }));

        let cancelled = engine.cancel(&workflow, &user("u-emp"), Utc::now()).expect("owner");
        assert_eq!(cancelled.status, ExpenseStatus::Cancelled);

        let workflow = ExpenseWorkflow { expense: cancelled, ledger: workflow.ledger };
        let error = engine.cancel(&workflow, &user("u-emp"), Utc::now()).expect_err("twice");
        assert!(matches!(error, WorkflowError::InvariantViolation { .. }));

        let error = engine
            .decide(&workflow, &user("u-mgr"), Verdict::Approve, None, Utc::now())
            .expect_err("cancelled expense");
        assert!(matches!(error, WorkflowError::InvariantViolation { .. }));
    }

    #[test]
    fn delete_is_owner_only_and_pending_only() {
        let engine = WorkflowEngine::new();
        let workflow = open(&[travel_rule()], Some("u-mgr"));

        let error = engine.delete(&workflow, &user("u-mgr")).expect_err("not owner");
        assert!(matches!(error, WorkflowError::NotFound { .. }));
        let deleted = engine.delete(&workflow, &user("u-emp")).expect("owner");
        assert_eq!(deleted, ExpenseId("EXP-100".to_string()));

        let approved = engine
            .decide(&open(&[], Some("u-mgr")), &user("u-mgr"), Verdict::Approve, None, Utc::now())
            .expect("approve")
            .into_workflow();
        let error = engine.delete(&approved, &user("u-emp")).expect_err("approved expense");
        assert!(matches!(
            error,
            WorkflowError::InvariantViolation { status: ExpenseStatus::Approved, .. }
        ));
    }

    #[test]
    fn audit_trail_reports_refusals_and_committed_resolution() {
        let engine = WorkflowEngine::new();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(ExpenseId("EXP-100".to_string())), "req-9", "u-mgr");
        let workflow = open(&[], Some("u-mgr"));

        engine
            .decide_with_audit(
                &workflow,
                &user("u-mgr"),
                Verdict::Reject,
                None,
                Utc::now(),
                &sink,
                &audit,
            )
            .expect_err("comment required");
        let outcome = engine
            .decide_with_audit(
                &workflow,
                &user("u-mgr"),
                Verdict::Approve,
                None,
                Utc::now(),
                &sink,
                &audit,
            )
            .expect("approve");
        assert_eq!(sink.event_types(), vec!["workflow.decision_refused".to_string()]);

        engine.audit_decided(&outcome, &sink, &audit);
        assert_eq!(
            sink.event_types(),
            vec![
                "workflow.decision_refused".to_string(),
                "workflow.decision_recorded".to_string(),
                "workflow.expense_resolved".to_string(),
            ]
        );
    }
}
