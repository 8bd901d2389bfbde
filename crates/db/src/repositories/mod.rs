use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use expensa_core::domain::decision::{ApprovalDecision, DecisionStatus};
use expensa_core::domain::expense::{Expense, ExpenseId};
use expensa_core::domain::rule::{ApprovalRule, RuleId};
use expensa_core::domain::user::{CompanyId, User, UserId};
use expensa_core::workflow::{DecisionOutcome, ExpenseWorkflow};

pub mod directory;
pub mod expense;
pub mod memory;
pub mod rule;

pub use directory::SqlDirectoryRepository;
pub use expense::SqlExpenseWorkflowRepository;
pub use memory::{
    InMemoryApprovalRuleRepository, InMemoryDirectoryRepository,
    InMemoryExpenseWorkflowRepository,
};
pub use rule::SqlApprovalRuleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid record: {0}")]
    Invalid(String),
    /// A guarded write matched no row because another writer got there first.
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Offset pagination for listing queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// One-based page number of `size` rows.
    pub fn new(number: u32, size: u32) -> Self {
        let size = size.max(1);
        Self { limit: size, offset: number.saturating_sub(1).saturating_mul(size) }
    }

    pub fn first(size: u32) -> Self {
        Self::new(1, size)
    }
}

/// One approver's decision row together with the expense it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQueueItem {
    pub expense: Expense,
    pub decision: ApprovalDecision,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    /// Pending decisions on expenses that are still awaiting a verdict.
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub total: u64,
}

impl ApprovalStats {
    pub fn from_counts(pending: u64, approved: u64, rejected: u64) -> Self {
        Self { pending, approved, rejected, total: pending + approved + rejected }
    }
}

#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn save_company(
        &self,
        id: &CompanyId,
        name: &str,
        currency: &str,
    ) -> Result<(), RepositoryError>;
    async fn save_user(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalRuleRepository: Send + Sync {
    /// Active rules of one company in declaration order.
    async fn list_active(&self, company_id: &CompanyId)
        -> Result<Vec<ApprovalRule>, RepositoryError>;
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError>;
    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError>;
}

/// Persists an expense and its ledger as one aggregate.
#[async_trait]
pub trait ExpenseWorkflowRepository: Send + Sync {
    async fn create(&self, workflow: &ExpenseWorkflow) -> Result<(), RepositoryError>;
    async fn load(&self, id: &ExpenseId) -> Result<Option<ExpenseWorkflow>, RepositoryError>;

    /// Writes the recorded decision and the (possibly unchanged) expense
    /// status. Fails with `Conflict` when either row is no longer pending.
    async fn commit_decision(&self, outcome: &DecisionOutcome) -> Result<(), RepositoryError>;

    /// Fails with `Conflict` when the expense is no longer pending.
    async fn commit_cancel(&self, expense: &Expense) -> Result<(), RepositoryError>;

    /// Removes a pending expense of `owner_id` and its ledger. Fails with
    /// `Conflict` when there is no such pending expense.
    async fn delete_pending(
        &self,
        expense_id: &ExpenseId,
        owner_id: &UserId,
    ) -> Result<(), RepositoryError>;

    async fn list_for_submitter(
        &self,
        submitter_id: &UserId,
        page: Page,
    ) -> Result<Vec<Expense>, RepositoryError>;

    /// Pending decisions of one approver on pending expenses, oldest first.
    async fn list_pending_for(
        &self,
        approver_id: &UserId,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError>;

    /// Decided rows of one approver, newest first. `None` means both verdicts.
    async fn history_for(
        &self,
        approver_id: &UserId,
        status: Option<DecisionStatus>,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError>;

    async fn stats_for(&self, approver_id: &UserId) -> Result<ApprovalStats, RepositoryError>;
}

pub(crate) fn decode_error(error: impl ToString) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid amount `{value}`: {error}")))
}

pub(crate) fn parse_optional_decimal(
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.as_deref().map(parse_decimal).transpose()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("invalid date `{value}`: {error}")))
}

pub(crate) fn parse_enum<T>(value: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.parse::<T>().map_err(decode_error)
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStats, Page};

    #[test]
    fn page_numbers_are_one_based() {
        assert_eq!(Page::first(10), Page { limit: 10, offset: 0 });
        assert_eq!(Page::new(3, 10), Page { limit: 10, offset: 20 });
        assert_eq!(Page::new(0, 10), Page { limit: 10, offset: 0 });
        assert_eq!(Page::new(2, 0), Page { limit: 1, offset: 1 });
    }

    #[test]
    fn stats_total_sums_every_bucket() {
        let stats = ApprovalStats::from_counts(2, 3, 1);
        assert_eq!(stats.total, 6);
    }
}
