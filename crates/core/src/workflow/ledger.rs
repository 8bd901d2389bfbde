use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::decision::{
    ApprovalDecision, DecisionId, DecisionStatus, Verdict, WorkflowPolicy,
};
use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;
use crate::errors::WorkflowError;
use crate::workflow::resolver::Resolution;

/// Every approver decision for one expense, ordered by sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    expense_id: ExpenseId,
    policy: WorkflowPolicy,
    decisions: Vec<ApprovalDecision>,
}

impl Ledger {
    /// Creates one pending decision per resolved assignment.
    pub fn open(expense_id: ExpenseId, resolution: Resolution, now: DateTime<Utc>) -> Self {
        let decisions = resolution
            .assignments
            .into_iter()
            .map(|assignment| ApprovalDecision {
                id: DecisionId(format!("APR-{}", Uuid::new_v4())),
                expense_id: expense_id.clone(),
                approver_id: assignment.approver_id,
                status: DecisionStatus::Pending,
                sequence: assignment.sequence,
                required: assignment.required,
                rule_id: assignment.rule_id,
                comments: None,
                decided_at: None,
                created_at: now,
            })
            .collect();

        Self::from_parts(expense_id, resolution.policy, decisions)
    }

    /// Rebuilds a ledger from persisted rows.
    pub fn from_parts(
        expense_id: ExpenseId,
        policy: WorkflowPolicy,
        mut decisions: Vec<ApprovalDecision>,
    ) -> Self {
        decisions.sort_by_key(|decision| decision.sequence);
        Self { expense_id, policy, decisions }
    }

    pub fn expense_id(&self) -> &ExpenseId {
        &self.expense_id
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn decisions(&self) -> &[ApprovalDecision] {
        &self.decisions
    }

    pub fn into_decisions(self) -> Vec<ApprovalDecision> {
        self.decisions
    }

    pub fn find(&self, approver_id: &UserId) -> Option<&ApprovalDecision> {
        self.decisions.iter().find(|decision| &decision.approver_id == approver_id)
    }

    pub fn count(&self, status: DecisionStatus) -> usize {
        self.decisions.iter().filter(|decision| decision.status == status).count()
    }

    /// The pending decision an approver must wait for under sequential
    /// approval, if any.
    pub fn blocking_decision(&self, approver_id: &UserId) -> Option<&ApprovalDecision> {
        if !self.policy.sequential {
            return None;
        }
        let target = self.find(approver_id)?;
        self.decisions
            .iter()
            .filter(|decision| decision.is_pending() && decision.sequence < target.sequence)
            .min_by_key(|decision| decision.sequence)
    }

    /// Applies one approver's verdict. Nothing is modified unless every check
    /// passes.
    pub fn record(
        &mut self,
        approver_id: &UserId,
        verdict: Verdict,
        comments: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<&ApprovalDecision, WorkflowError> {
        let index = self
            .decisions
            .iter()
            .position(|decision| &decision.approver_id == approver_id)
            .ok_or_else(|| {
                WorkflowError::not_found(
                    "approval decision",
                    format!("{}/{}", self.expense_id, approver_id),
                )
            })?;

        let current = &self.decisions[index];
        if !current.is_pending() {
            return Err(WorkflowError::AlreadyDecided {
                expense_id: self.expense_id.clone(),
                approver_id: approver_id.clone(),
                status: current.status,
            });
        }

        let comments = comments.map(str::trim).filter(|text| !text.is_empty());
        if verdict == Verdict::Reject && comments.is_none() {
            return Err(WorkflowError::CommentRequired);
        }

        if let Some(blocking) = self.blocking_decision(approver_id) {
            return Err(WorkflowError::OutOfSequence {
                expense_id: self.expense_id.clone(),
                approver_id: approver_id.clone(),
                waiting_on: blocking.approver_id.clone(),
            });
        }

        let decision = &mut self.decisions[index];
        decision.status = verdict.resulting_status();
        decision.comments = comments.map(str::to_owned);
        decision.decided_at = Some(at);
        Ok(decision)
    }
}
