use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::rule::{ApprovalRule, RuleId};
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown decision status `{other}`")))
            }
        }
    }
}

/// What an approver can do with a pending decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn resulting_status(&self) -> DecisionStatus {
        match self {
            Self::Approve => DecisionStatus::Approved,
            Self::Reject => DecisionStatus::Rejected,
        }
    }
}

impl FromStr for Verdict {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown verdict `{other}` (expected approve|reject)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub status: DecisionStatus,
    pub sequence: u32,
    pub required: bool,
    pub rule_id: Option<RuleId>,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn is_pending(&self) -> bool {
        self.status == DecisionStatus::Pending
    }
}

/// The parts of a matched rule that completion evaluation depends on, frozen
/// when the ledger is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    pub rule_id: Option<RuleId>,
    pub rule_name: Option<String>,
    pub sequential: bool,
    pub min_approval_percentage: Option<u8>,
}

impl WorkflowPolicy {
    /// Manager-only fallback used when no rule matched.
    pub fn manager_fallback() -> Self {
        Self::default()
    }

    pub fn from_rule(rule: &ApprovalRule) -> Self {
        Self {
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.name.clone()),
            sequential: rule.sequential,
            min_approval_percentage: rule.min_approval_percentage,
        }
    }
}
