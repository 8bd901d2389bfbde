use serde::Serialize;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_COMPANY_ID: &str = "acme";

const SEED_USERS: &[SeedUserContract] = &[
    SeedUserContract { id: "u-admin", role: "admin", manager_id: None },
    SeedUserContract { id: "u-cfo", role: "admin", manager_id: None },
    SeedUserContract { id: "u-fin", role: "manager", manager_id: Some("u-cfo") },
    SeedUserContract { id: "u-mgr", role: "manager", manager_id: Some("u-cfo") },
    SeedUserContract { id: "u-emp", role: "employee", manager_id: Some("u-mgr") },
    SeedUserContract { id: "u-solo", role: "employee", manager_id: None },
];

const SEED_RULES: &[SeedRuleContract] = &[
    SeedRuleContract {
        id: "rule-travel",
        priority: 0,
        sequential: false,
        approver_ids: &["u-fin", "u-cfo"],
        description: "Travel up to 10k: manager, then finance and the CFO in parallel",
    },
    SeedRuleContract {
        id: "rule-large-spend",
        priority: 10,
        sequential: true,
        approver_ids: &["u-fin", "u-cfo"],
        description: "Anything above 10k: manager, finance, CFO in order with a 60% quorum",
    },
];

struct SeedUserContract {
    id: &'static str,
    role: &'static str,
    manager_id: Option<&'static str>,
}

struct SeedRuleContract {
    id: &'static str,
    priority: i64,
    sequential: bool,
    approver_ids: &'static [&'static str],
    description: &'static str,
}

/// Deterministic demo company with a reporting line and two approval rules.
///
/// `u-emp` reports to `u-mgr`; `u-solo` has no manager and only gets routed
/// when a rule matches.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Re-running is a no-op.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(SeedResult {
            company_id: SEED_COMPANY_ID,
            users_seeded: SEED_USERS.iter().map(|user| user.id).collect(),
            rules_seeded: SEED_RULES
                .iter()
                .map(|rule| RuleSeedInfo { rule_id: rule.id, description: rule.description })
                .collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let company: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM companies WHERE id = ?1)")
                .bind(SEED_COMPANY_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("company".to_string(), company == 1));

        for user in SEED_USERS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM users
                 WHERE id = ?1 AND company_id = ?2 AND role = ?3
                   AND manager_id IS ?4 AND active = 1)",
            )
            .bind(user.id)
            .bind(SEED_COMPANY_ID)
            .bind(user.role)
            .bind(user.manager_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("user:{}", user.id), present == 1));
        }

        for rule in SEED_RULES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_rules
                 WHERE id = ?1 AND company_id = ?2 AND priority = ?3 AND sequential = ?4
                   AND active = 1)",
            )
            .bind(rule.id)
            .bind(SEED_COMPANY_ID)
            .bind(rule.priority)
            .bind(rule.sequential)
            .fetch_one(pool)
            .await?;
            checks.push((format!("rule:{}", rule.id), present == 1));

            let approvers: Vec<String> = sqlx::query_scalar(
                "SELECT approver_id FROM approver_assignments
                 WHERE rule_id = ?1 ORDER BY position ASC",
            )
            .bind(rule.id)
            .fetch_all(pool)
            .await?;
            checks.push((format!("rule:{}:approvers", rule.id), approvers == rule.approver_ids));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub company_id: &'static str,
    pub users_seeded: Vec<&'static str>,
    pub rules_seeded: Vec<RuleSeedInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RuleSeedInfo {
    pub rule_id: &'static str,
    pub description: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
