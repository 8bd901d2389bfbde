use std::collections::HashSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseCategory;
use crate::domain::user::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive `[min, max]` bound on the converted expense amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl AmountRange {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// Which expense categories a rule or assignment covers.
///
/// `Any` is stored as SQL `NULL` and also what an empty list decodes to, so a
/// rule never accidentally matches nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "categories", rename_all = "snake_case")]
pub enum CategoryScope {
    #[default]
    Any,
    Only(Vec<ExpenseCategory>),
}

impl CategoryScope {
    pub fn from_list(categories: Vec<ExpenseCategory>) -> Self {
        if categories.is_empty() {
            Self::Any
        } else {
            Self::Only(categories)
        }
    }

    pub fn covers(&self, category: ExpenseCategory) -> bool {
        match self {
            Self::Any => true,
            Self::Only(categories) if categories.is_empty() => true,
            Self::Only(categories) => categories.contains(&category),
        }
    }

    pub fn categories(&self) -> &[ExpenseCategory] {
        match self {
            Self::Any => &[],
            Self::Only(categories) => categories,
        }
    }
}

/// One approver slot inside a rule. Copied into an expense's ledger when the
/// expense enters the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverAssignment {
    pub approver_id: UserId,
    pub sequence: u32,
    pub required: bool,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub categories: CategoryScope,
    pub active: bool,
}

impl ApproverAssignment {
    pub fn new(approver_id: UserId, sequence: u32) -> Self {
        Self {
            approver_id,
            sequence,
            required: true,
            min_amount: None,
            max_amount: None,
            categories: CategoryScope::Any,
            active: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn applies_to(&self, amount: Decimal, category: ExpenseCategory) -> bool {
        if !self.active {
            return false;
        }
        if let Some(min_amount) = self.min_amount {
            if amount < min_amount {
                return false;
            }
        }
        if let Some(max_amount) = self.max_amount {
            if amount > max_amount {
                return false;
            }
        }
        self.categories.covers(category)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub description: Option<String>,
    pub amount_range: Option<AmountRange>,
    pub categories: CategoryScope,
    pub manager_approves_first: bool,
    pub sequential: bool,
    pub min_approval_percentage: Option<u8>,
    /// Higher priority rules are tried first.
    pub priority: i32,
    pub active: bool,
    pub created_by: UserId,
    pub approvers: Vec<ApproverAssignment>,
}

impl ApprovalRule {
    pub fn covers_amount(&self, amount: Decimal) -> bool {
        match &self.amount_range {
            None => true,
            Some(range) => range.contains(amount),
        }
    }

    pub fn covers_category(&self, category: ExpenseCategory) -> bool {
        self.categories.covers(category)
    }

    pub fn matches(&self, amount: Decimal, category: ExpenseCategory) -> bool {
        self.covers_amount(amount) && self.covers_category(category)
    }

    /// Templates in the order they should be assigned.
    pub fn ordered_approvers(&self) -> Vec<&ApproverAssignment> {
        let mut approvers: Vec<&ApproverAssignment> = self.approvers.iter().collect();
        approvers.sort_by_key(|assignment| assignment.sequence);
        approvers
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |reason: String| DomainError::InvalidRule { rule_id: self.id.clone(), reason };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }

        if let Some(range) = &self.amount_range {
            if range.min < Decimal::ZERO {
                return Err(invalid("amount range minimum must not be negative".to_string()));
            }
            if range.min > range.max {
                return Err(invalid(format!(
                    "amount range minimum {} exceeds maximum {}",
                    range.min, range.max
                )));
            }
        }

        if let Some(percentage) = self.min_approval_percentage {
            if percentage == 0 || percentage > 100 {
                return Err(invalid(format!(
                    "minimum approval percentage {percentage} must be in range 1..=100"
                )));
            }
        }

        for assignment in &self.approvers {
            if let (Some(min), Some(max)) = (assignment.min_amount, assignment.max_amount) {
                if min > max {
                    return Err(invalid(format!(
                        "approver `{}` has minimum amount {min} above maximum {max}",
                        assignment.approver_id
                    )));
                }
            }
        }

        if self.sequential {
            let mut seen = HashSet::new();
            for assignment in &self.approvers {
                if !seen.insert(assignment.sequence) {
                    return Err(invalid(format!(
                        "sequence position {} is used more than once",
                        assignment.sequence
                    )));
                }
            }
        }

        Ok(())
    }
}
