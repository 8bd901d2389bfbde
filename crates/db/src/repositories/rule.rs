use chrono::Utc;
use sqlx::Row;

use expensa_core::domain::expense::ExpenseCategory;
use expensa_core::domain::rule::{
    AmountRange, ApprovalRule, ApproverAssignment, CategoryScope, RuleId,
};
use expensa_core::domain::user::{CompanyId, UserId};

use super::{
    decode_error, parse_optional_decimal, ApprovalRuleRepository, RepositoryError,
};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, company_id, name, description, min_amount, max_amount, categories,
    manager_approves_first, sequential, min_approval_percentage, priority, active, created_by";

pub struct SqlApprovalRuleRepository {
    pool: DbPool,
}

impl SqlApprovalRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_approvers(
        &self,
        rule_id: &str,
    ) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT approver_id, sequence, required, min_amount, max_amount, categories, active
             FROM approver_assignments WHERE rule_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignment).collect()
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
        let mut rule = row_to_rule(row)?;
        rule.approvers = self.load_approvers(&rule.id.0).await?;
        Ok(rule)
    }
}

pub(crate) fn encode_categories(scope: &CategoryScope) -> Result<Option<String>, RepositoryError> {
    match scope {
        CategoryScope::Any => Ok(None),
        CategoryScope::Only(categories) if categories.is_empty() => Ok(None),
        CategoryScope::Only(categories) => serde_json::to_string(categories)
            .map(Some)
            .map_err(|error| RepositoryError::Invalid(error.to_string())),
    }
}

pub(crate) fn decode_categories(value: Option<String>) -> Result<CategoryScope, RepositoryError> {
    match value {
        None => Ok(CategoryScope::Any),
        Some(json) => {
            let categories: Vec<ExpenseCategory> = serde_json::from_str(&json)
                .map_err(|error| RepositoryError::Decode(format!("categories `{json}`: {error}")))?;
            Ok(CategoryScope::from_list(categories))
        }
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let description: Option<String> = row.try_get("description").map_err(decode_error)?;
    let min_amount: Option<String> = row.try_get("min_amount").map_err(decode_error)?;
    let max_amount: Option<String> = row.try_get("max_amount").map_err(decode_error)?;
    let categories: Option<String> = row.try_get("categories").map_err(decode_error)?;
    let manager_approves_first: bool =
        row.try_get("manager_approves_first").map_err(decode_error)?;
    let sequential: bool = row.try_get("sequential").map_err(decode_error)?;
    let min_approval_percentage: Option<i64> =
        row.try_get("min_approval_percentage").map_err(decode_error)?;
    let priority: i64 = row.try_get("priority").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;
    let created_by: String = row.try_get("created_by").map_err(decode_error)?;

    let amount_range = match (parse_optional_decimal(min_amount)?, parse_optional_decimal(max_amount)?)
    {
        (Some(min), Some(max)) => Some(AmountRange::new(min, max)),
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(format!(
                "rule `{id}` has a half-open amount range"
            )))
        }
    };

    Ok(ApprovalRule {
        id: RuleId(id),
        company_id: CompanyId(company_id),
        name,
        description,
        amount_range,
        categories: decode_categories(categories)?,
        manager_approves_first,
        sequential,
        min_approval_percentage: min_approval_percentage
            .map(u8::try_from)
            .transpose()
            .map_err(decode_error)?,
        priority: i32::try_from(priority).map_err(decode_error)?,
        active,
        created_by: UserId(created_by),
        approvers: Vec::new(),
    })
}

fn row_to_assignment(row: &sqlx::sqlite::SqliteRow) -> Result<ApproverAssignment, RepositoryError> {
    let approver_id: String = row.try_get("approver_id").map_err(decode_error)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode_error)?;
    let required: bool = row.try_get("required").map_err(decode_error)?;
    let min_amount: Option<String> = row.try_get("min_amount").map_err(decode_error)?;
    let max_amount: Option<String> = row.try_get("max_amount").map_err(decode_error)?;
    let categories: Option<String> = row.try_get("categories").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;

    Ok(ApproverAssignment {
        approver_id: UserId(approver_id),
        sequence: u32::try_from(sequence).map_err(decode_error)?,
        required,
        min_amount: parse_optional_decimal(min_amount)?,
        max_amount: parse_optional_decimal(max_amount)?,
        categories: decode_categories(categories)?,
        active,
    })
}

#[async_trait::async_trait]
impl ApprovalRuleRepository for SqlApprovalRuleRepository {
    async fn list_active(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rules
             WHERE company_id = ? AND active = 1
             ORDER BY declared_order ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            rules.push(self.hydrate(row).await?);
        }
        Ok(rules)
    }

    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rules WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        rule.validate().map_err(|error| RepositoryError::Invalid(error.to_string()))?;

        let now = Utc::now().to_rfc3339();
        let (min_amount, max_amount) = match rule.amount_range {
            Some(range) => (Some(range.min.to_string()), Some(range.max.to_string())),
            None => (None, None),
        };
        let categories = encode_categories(&rule.categories)?;

        let mut tx = self.pool.begin().await?;

        // Re-saving keeps the original declaration slot.
        sqlx::query(
            "INSERT INTO approval_rules (
                 id, company_id, name, description, min_amount, max_amount, categories,
                 manager_approves_first, sequential, min_approval_percentage, priority, active,
                 created_by, declared_order, created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     (SELECT COALESCE(MAX(declared_order), 0) + 1 FROM approval_rules), ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 categories = excluded.categories,
                 manager_approves_first = excluded.manager_approves_first,
                 sequential = excluded.sequential,
                 min_approval_percentage = excluded.min_approval_percentage,
                 priority = excluded.priority,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&min_amount)
        .bind(&max_amount)
        .bind(&categories)
        .bind(rule.manager_approves_first)
        .bind(rule.sequential)
        .bind(rule.min_approval_percentage.map(i64::from))
        .bind(i64::from(rule.priority))
        .bind(rule.active)
        .bind(&rule.created_by.0)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM approver_assignments WHERE rule_id = ?")
            .bind(&rule.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, approver) in rule.approvers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO approver_assignments (
                     rule_id, approver_id, sequence, required, min_amount, max_amount,
                     categories, active, position
                 )
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&rule.id.0)
            .bind(&approver.approver_id.0)
            .bind(i64::from(approver.sequence))
            .bind(approver.required)
            .bind(approver.min_amount.map(|amount| amount.to_string()))
            .bind(approver.max_amount.map(|amount| amount.to_string()))
            .bind(encode_categories(&approver.categories)?)
            .bind(approver.active)
            .bind(position as i64 + 1)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use expensa_core::domain::expense::ExpenseCategory;
    use expensa_core::domain::rule::{
        AmountRange, ApprovalRule, ApproverAssignment, CategoryScope, RuleId,
    };
    use expensa_core::domain::user::{CompanyId, UserId};

    use super::SqlApprovalRuleRepository;
    use crate::fixtures::DemoSeedDataset;
    use crate::repositories::{ApprovalRuleRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("seed");
        pool
    }

    fn rule(id: &str, priority: i32) -> ApprovalRule {
        ApprovalRule {
            id: RuleId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            name: format!("Rule {id}"),
            description: None,
            amount_range: Some(AmountRange::new(Decimal::ZERO, Decimal::new(500, 0))),
            categories: CategoryScope::Only(vec![ExpenseCategory::Meals]),
            manager_approves_first: false,
            sequential: true,
            min_approval_percentage: Some(50),
            priority,
            active: true,
            created_by: UserId("u-admin".to_string()),
            approvers: vec![
                ApproverAssignment::new(UserId("u-fin".to_string()), 1),
                ApproverAssignment {
                    max_amount: Some(Decimal::new(250, 0)),
                    ..ApproverAssignment::new(UserId("u-cfo".to_string()), 2).optional()
                },
            ],
        }
    }

    #[tokio::test]
    async fn seeded_rules_load_in_declaration_order() {
        let pool = setup().await;
        let repo = SqlApprovalRuleRepository::new(pool);

        let rules = repo.list_active(&CompanyId("acme".to_string())).await.expect("list");
        let ids: Vec<_> = rules.iter().map(|rule| rule.id.0.as_str()).collect();
        assert_eq!(ids, vec!["rule-travel", "rule-large-spend"]);

        let travel = &rules[0];
        assert_eq!(travel.categories, CategoryScope::Only(vec![ExpenseCategory::Travel]));
        assert_eq!(
            travel.amount_range,
            Some(AmountRange::new(Decimal::ZERO, Decimal::new(10_000, 0)))
        );
        assert_eq!(travel.approvers.len(), 2);

        let large = &rules[1];
        assert_eq!(large.categories, CategoryScope::Any);
        assert_eq!(large.min_approval_percentage, Some(60));
        assert!(!large.approvers[1].required);
    }

    #[tokio::test]
    async fn save_round_trips_assignments_and_keeps_declaration_slot() {
        let pool = setup().await;
        let repo = SqlApprovalRuleRepository::new(pool);

        let saved = rule("rule-meals", 5);
        repo.save(saved.clone()).await.expect("save");
        let loaded = repo
            .find_by_id(&RuleId("rule-meals".to_string()))
            .await
            .expect("find")
            .expect("rule exists");
        assert_eq!(loaded, saved);

        let mut travel = repo
            .find_by_id(&RuleId("rule-travel".to_string()))
            .await
            .expect("find")
            .expect("rule exists");
        travel.priority = 99;
        travel.approvers.truncate(1);
        repo.save(travel).await.expect("update");

        let rules = repo.list_active(&CompanyId("acme".to_string())).await.expect("list");
        let ids: Vec<_> = rules.iter().map(|rule| rule.id.0.as_str()).collect();
        assert_eq!(ids, vec!["rule-travel", "rule-large-spend", "rule-meals"]);
        assert_eq!(rules[0].priority, 99);
        assert_eq!(rules[0].approvers.len(), 1);
    }

    #[tokio::test]
    async fn inactive_rules_are_not_listed() {
        let pool = setup().await;
        let repo = SqlApprovalRuleRepository::new(pool);

        let mut inactive = rule("rule-off", 0);
        inactive.active = false;
        repo.save(inactive).await.expect("save");

        let rules = repo.list_active(&CompanyId("acme".to_string())).await.expect("list");
        assert!(rules.iter().all(|rule| rule.id.0 != "rule-off"));
    }

    #[tokio::test]
    async fn save_rejects_invalid_rule() {
        let pool = setup().await;
        let repo = SqlApprovalRuleRepository::new(pool);

        let mut invalid = rule("rule-bad", 0);
        invalid.min_approval_percentage = Some(0);
        let error = repo.save(invalid).await.expect_err("invalid rule");
        assert!(matches!(error, RepositoryError::Invalid(_)));
        assert!(repo.find_by_id(&RuleId("rule-bad".to_string())).await.expect("find").is_none());
    }
}
