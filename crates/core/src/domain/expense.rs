use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Travel,
    Meals,
    Accommodation,
    Transport,
    OfficeSupplies,
    Entertainment,
    Training,
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 8] = [
        Self::Travel,
        Self::Meals,
        Self::Accommodation,
        Self::Transport,
        Self::OfficeSupplies,
        Self::Entertainment,
        Self::Training,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "travel",
            Self::Meals => "meals",
            Self::Accommodation => "accommodation",
            Self::Transport => "transport",
            Self::OfficeSupplies => "office_supplies",
            Self::Entertainment => "entertainment",
            Self::Training => "training",
            Self::Other => "other",
        }
    }
}

impl FromStr for ExpenseCategory {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|category| category.as_str() == key).ok_or_else(|| {
            DomainError::InvariantViolation(format!("unknown expense category `{value}`"))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for ExpenseStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown expense status `{other}`")))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub submitted_by: UserId,
    pub title: String,
    pub description: Option<String>,
    /// Amount in the currency the expense was incurred in.
    pub amount: Decimal,
    pub currency: String,
    /// Amount converted into the company currency. Rules match against this.
    pub converted_amount: Decimal,
    pub category: ExpenseCategory,
    pub expense_date: NaiveDate,
    pub status: ExpenseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Expense {
    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Pending, ExpenseStatus::Approved)
                | (ExpenseStatus::Pending, ExpenseStatus::Rejected)
                | (ExpenseStatus::Pending, ExpenseStatus::Cancelled)
        )
    }

    pub fn transition_to(
        &mut self,
        next: ExpenseStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidExpenseTransition { from: self.status, to: next });
        }

        self.status = next;
        self.updated_at = at;
        self.resolved_at = Some(at);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::InvariantViolation("expense title must not be empty".into()));
        }
        if self.amount <= Decimal::ZERO || self.converted_amount <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation(
                "expense amount must be greater than zero".into(),
            ));
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
            return Err(DomainError::InvariantViolation(format!(
                "expense currency `{}` must be a three-letter ISO code",
                self.currency
            )));
        }
        Ok(())
    }
}
