use sqlx::Row;

use expensa_core::domain::decision::{
    ApprovalDecision, DecisionId, DecisionStatus, WorkflowPolicy,
};
use expensa_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
use expensa_core::domain::rule::RuleId;
use expensa_core::domain::user::{CompanyId, UserId};
use expensa_core::workflow::{DecisionOutcome, ExpenseWorkflow, Ledger};

use super::{
    decode_error, parse_date, parse_decimal, parse_enum, parse_optional_timestamp,
    parse_timestamp, ApprovalQueueItem, ApprovalStats, ExpenseWorkflowRepository, Page,
    RepositoryError,
};
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "e.id AS id, e.company_id AS company_id,
    e.submitted_by AS submitted_by, e.title AS title, e.description AS description,
    e.amount AS amount, e.currency AS currency, e.converted_amount AS converted_amount,
    e.category AS category, e.expense_date AS expense_date, e.status AS status,
    e.policy_rule_id AS policy_rule_id, e.policy_rule_name AS policy_rule_name,
    e.policy_sequential AS policy_sequential,
    e.policy_min_approval_percentage AS policy_min_approval_percentage,
    e.created_at AS created_at, e.updated_at AS updated_at, e.resolved_at AS resolved_at";

const DECISION_COLUMNS: &str = "a.id AS decision_id, a.expense_id AS decision_expense_id,
    a.approver_id AS decision_approver_id, a.status AS decision_status,
    a.sequence AS decision_sequence, a.required AS decision_required,
    a.rule_id AS decision_rule_id, a.comments AS decision_comments,
    a.decided_at AS decision_decided_at, a.created_at AS decision_created_at";

pub struct SqlExpenseWorkflowRepository {
    pool: DbPool,
}

impl SqlExpenseWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn queue_items(
        &self,
        sql: &str,
        approver_id: &UserId,
        status: Option<DecisionStatus>,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError> {
        let mut query = sqlx::query(sql).bind(&approver_id.0);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ApprovalQueueItem, RepositoryError> {
                Ok(ApprovalQueueItem {
                    expense: row_to_expense(row)?,
                    decision: row_to_decision(row)?,
                })
            })
            .collect()
    }
}

fn row_to_expense(row: &sqlx::sqlite::SqliteRow) -> Result<Expense, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let submitted_by: String = row.try_get("submitted_by").map_err(decode_error)?;
    let title: String = row.try_get("title").map_err(decode_error)?;
    let description: Option<String> = row.try_get("description").map_err(decode_error)?;
    let amount: String = row.try_get("amount").map_err(decode_error)?;
    let currency: String = row.try_get("currency").map_err(decode_error)?;
    let converted_amount: String = row.try_get("converted_amount").map_err(decode_error)?;
    let category: String = row.try_get("category").map_err(decode_error)?;
    let expense_date: String = row.try_get("expense_date").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;
    let resolved_at: Option<String> = row.try_get("resolved_at").map_err(decode_error)?;

    Ok(Expense {
        id: ExpenseId(id),
        company_id: CompanyId(company_id),
        submitted_by: UserId(submitted_by),
        title,
        description,
        amount: parse_decimal(&amount)?,
        currency,
        converted_amount: parse_decimal(&converted_amount)?,
        category: parse_enum::<ExpenseCategory>(&category)?,
        expense_date: parse_date(&expense_date)?,
        status: parse_enum::<ExpenseStatus>(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        resolved_at: parse_optional_timestamp(resolved_at)?,
    })
}

fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowPolicy, RepositoryError> {
    let rule_id: Option<String> = row.try_get("policy_rule_id").map_err(decode_error)?;
    let rule_name: Option<String> = row.try_get("policy_rule_name").map_err(decode_error)?;
    let sequential: bool = row.try_get("policy_sequential").map_err(decode_error)?;
    let min_approval_percentage: Option<i64> =
        row.try_get("policy_min_approval_percentage").map_err(decode_error)?;

    Ok(WorkflowPolicy {
        rule_id: rule_id.map(RuleId),
        rule_name,
        sequential,
        min_approval_percentage: min_approval_percentage
            .map(u8::try_from)
            .transpose()
            .map_err(decode_error)?,
    })
}

fn row_to_decision(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDecision, RepositoryError> {
    let id: String = row.try_get("decision_id").map_err(decode_error)?;
    let expense_id: String = row.try_get("decision_expense_id").map_err(decode_error)?;
    let approver_id: String = row.try_get("decision_approver_id").map_err(decode_error)?;
    let status: String = row.try_get("decision_status").map_err(decode_error)?;
    let sequence: i64 = row.try_get("decision_sequence").map_err(decode_error)?;
    let required: bool = row.try_get("decision_required").map_err(decode_error)?;
    let rule_id: Option<String> = row.try_get("decision_rule_id").map_err(decode_error)?;
    let comments: Option<String> = row.try_get("decision_comments").map_err(decode_error)?;
    let decided_at: Option<String> = row.try_get("decision_decided_at").map_err(decode_error)?;
    let created_at: String = row.try_get("decision_created_at").map_err(decode_error)?;

    Ok(ApprovalDecision {
        id: DecisionId(id),
        expense_id: ExpenseId(expense_id),
        approver_id: UserId(approver_id),
        status: parse_enum::<DecisionStatus>(&status)?,
        sequence: u32::try_from(sequence).map_err(decode_error)?,
        required,
        rule_id: rule_id.map(RuleId),
        comments,
        decided_at: parse_optional_timestamp(decided_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn conflict(expense_id: &ExpenseId, what: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("{what} for expense `{expense_id}` is no longer pending"))
}

#[async_trait::async_trait]
impl ExpenseWorkflowRepository for SqlExpenseWorkflowRepository {
    async fn create(&self, workflow: &ExpenseWorkflow) -> Result<(), RepositoryError> {
        let expense = &workflow.expense;
        let policy = workflow.ledger.policy();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expenses (
                 id, company_id, submitted_by, title, description, amount, currency,
                 converted_amount, category, expense_date, status, policy_rule_id,
                 policy_rule_name, policy_sequential, policy_min_approval_percentage,
                 created_at, updated_at, resolved_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&expense.id.0)
        .bind(&expense.company_id.0)
        .bind(&expense.submitted_by.0)
        .bind(&expense.title)
        .bind(&expense.description)
        .bind(expense.amount.to_string())
        .bind(&expense.currency)
        .bind(expense.converted_amount.to_string())
        .bind(expense.category.as_str())
        .bind(expense.expense_date.format("%Y-%m-%d").to_string())
        .bind(expense.status.as_str())
        .bind(policy.rule_id.as_ref().map(|id| id.0.as_str()))
        .bind(policy.rule_name.as_deref())
        .bind(policy.sequential)
        .bind(policy.min_approval_percentage.map(i64::from))
        .bind(expense.created_at.to_rfc3339())
        .bind(expense.updated_at.to_rfc3339())
        .bind(expense.resolved_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        for decision in workflow.ledger.decisions() {
            sqlx::query(
                "INSERT INTO expense_approvals (
                     id, expense_id, approver_id, status, sequence, required, rule_id,
                     comments, decided_at, created_at
                 )
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&decision.id.0)
            .bind(&decision.expense_id.0)
            .bind(&decision.approver_id.0)
            .bind(decision.status.as_str())
            .bind(i64::from(decision.sequence))
            .bind(decision.required)
            .bind(decision.rule_id.as_ref().map(|id| id.0.as_str()))
            .bind(&decision.comments)
            .bind(decision.decided_at.map(|dt| dt.to_rfc3339()))
            .bind(decision.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, id: &ExpenseId) -> Result<Option<ExpenseWorkflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses e WHERE e.id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let expense = row_to_expense(&row)?;
        let policy = row_to_policy(&row)?;

        let decision_rows = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM expense_approvals a
             WHERE a.expense_id = ? ORDER BY a.sequence ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        let decisions =
            decision_rows.iter().map(row_to_decision).collect::<Result<Vec<_>, _>>()?;

        let ledger = Ledger::from_parts(expense.id.clone(), policy, decisions);
        Ok(Some(ExpenseWorkflow { expense, ledger }))
    }

    async fn commit_decision(&self, outcome: &DecisionOutcome) -> Result<(), RepositoryError> {
        let decision = &outcome.decision;
        let expense = &outcome.expense;

        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            "UPDATE expense_approvals SET status = ?, comments = ?, decided_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(decision.status.as_str())
        .bind(&decision.comments)
        .bind(decision.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&decision.id.0)
        .execute(&mut *tx)
        .await?;
        if recorded.rows_affected() != 1 {
            return Err(conflict(&expense.id, "approval decision"));
        }

        let updated = sqlx::query(
            "UPDATE expenses SET status = ?, updated_at = ?, resolved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(expense.status.as_str())
        .bind(expense.updated_at.to_rfc3339())
        .bind(expense.resolved_at.map(|dt| dt.to_rfc3339()))
        .bind(&expense.id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(conflict(&expense.id, "expense status"));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_cancel(&self, expense: &Expense) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            "UPDATE expenses SET status = ?, updated_at = ?, resolved_at = ?
             WHERE id = ? AND submitted_by = ? AND status = 'pending'",
        )
        .bind(expense.status.as_str())
        .bind(expense.updated_at.to_rfc3339())
        .bind(expense.resolved_at.map(|dt| dt.to_rfc3339()))
        .bind(&expense.id.0)
        .bind(&expense.submitted_by.0)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(conflict(&expense.id, "expense status"));
        }
        Ok(())
    }

    async fn delete_pending(
        &self,
        expense_id: &ExpenseId,
        owner_id: &UserId,
    ) -> Result<(), RepositoryError> {
        // Decision rows go with the expense through ON DELETE CASCADE.
        let deleted = sqlx::query(
            "DELETE FROM expenses WHERE id = ? AND submitted_by = ? AND status = 'pending'",
        )
        .bind(&expense_id.0)
        .bind(&owner_id.0)
        .execute(&self.pool)
        .await?;
        if deleted.rows_affected() != 1 {
            return Err(conflict(expense_id, "expense"));
        }
        Ok(())
    }

    async fn list_for_submitter(
        &self,
        submitter_id: &UserId,
        page: Page,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses e
             WHERE e.submitted_by = ?
             ORDER BY e.created_at DESC, e.id ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(&submitter_id.0)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_expense).collect()
    }

    async fn list_pending_for(
        &self,
        approver_id: &UserId,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError> {
        let sql = format!(
            "SELECT {EXPENSE_COLUMNS}, {DECISION_COLUMNS}
             FROM expense_approvals a
             JOIN expenses e ON e.id = a.expense_id
             WHERE a.approver_id = ? AND a.status = 'pending' AND e.status = 'pending'
             ORDER BY e.created_at ASC, e.id ASC
             LIMIT ? OFFSET ?"
        );
        self.queue_items(&sql, approver_id, None, page).await
    }

    async fn history_for(
        &self,
        approver_id: &UserId,
        status: Option<DecisionStatus>,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError> {
        let status_filter = if status.is_some() { "a.status = ?" } else { "a.status <> 'pending'" };
        let sql = format!(
            "SELECT {EXPENSE_COLUMNS}, {DECISION_COLUMNS}
             FROM expense_approvals a
             JOIN expenses e ON e.id = a.expense_id
             WHERE a.approver_id = ? AND {status_filter}
             ORDER BY a.decided_at DESC, e.id ASC
             LIMIT ? OFFSET ?"
        );
        self.queue_items(&sql, approver_id, status, page).await
    }

    async fn stats_for(&self, approver_id: &UserId) -> Result<ApprovalStats, RepositoryError> {
        let (pending, approved, rejected) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT
                 COALESCE(SUM(CASE WHEN a.status = 'pending' AND e.status = 'pending' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN a.status = 'approved' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN a.status = 'rejected' THEN 1 ELSE 0 END), 0)
             FROM expense_approvals a
             JOIN expenses e ON e.id = a.expense_id
             WHERE a.approver_id = ?",
        )
        .bind(&approver_id.0)
        .fetch_one(&self.pool)
        .await?;

        let count = |value: i64| u64::try_from(value).map_err(decode_error);
        Ok(ApprovalStats::from_counts(count(pending)?, count(approved)?, count(rejected)?))
    }
}
