use std::collections::HashMap;

use tokio::sync::RwLock;

use expensa_core::domain::decision::{ApprovalDecision, DecisionStatus};
use expensa_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expensa_core::domain::rule::{ApprovalRule, RuleId};
use expensa_core::domain::user::{CompanyId, User, UserId};
use expensa_core::workflow::{DecisionOutcome, ExpenseWorkflow, Ledger};

use super::{
    ApprovalQueueItem, ApprovalRuleRepository, ApprovalStats, DirectoryRepository,
    ExpenseWorkflowRepository, Page, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryDirectoryRepository {
    companies: RwLock<HashMap<String, (String, String)>>,
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl DirectoryRepository for InMemoryDirectoryRepository {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn save_company(
        &self,
        id: &CompanyId,
        name: &str,
        currency: &str,
    ) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        companies.insert(id.0.clone(), (name.to_string(), currency.to_string()));
        Ok(())
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        if !self.companies.read().await.contains_key(&user.company_id.0) {
            return Err(RepositoryError::Invalid(format!(
                "user `{}` references unknown company `{}`",
                user.id, user.company_id.0
            )));
        }
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

/// Rules kept in declaration order.
#[derive(Default)]
pub struct InMemoryApprovalRuleRepository {
    rules: RwLock<Vec<ApprovalRule>>,
}

#[async_trait::async_trait]
impl ApprovalRuleRepository for InMemoryApprovalRuleRepository {
    async fn list_active(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules
            .iter()
            .filter(|rule| rule.active && &rule.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.iter().find(|rule| &rule.id == id).cloned())
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        rule.validate().map_err(|error| RepositoryError::Invalid(error.to_string()))?;

        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExpenseWorkflowRepository {
    workflows: RwLock<HashMap<String, ExpenseWorkflow>>,
}

impl InMemoryExpenseWorkflowRepository {
    async fn decisions_of(
        &self,
        approver_id: &UserId,
        keep: impl Fn(&Expense, &ApprovalDecision) -> bool,
    ) -> Vec<ApprovalQueueItem> {
        let workflows = self.workflows.read().await;
        workflows
            .values()
            .flat_map(|workflow| {
                workflow
                    .ledger
                    .decisions()
                    .iter()
                    .filter(|decision| &decision.approver_id == approver_id)
                    .filter(|decision| keep(&workflow.expense, decision))
                    .map(|decision| ApprovalQueueItem {
                        expense: workflow.expense.clone(),
                        decision: decision.clone(),
                    })
            })
            .collect()
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.offset as usize).take(page.limit as usize).collect()
}

fn conflict(expense_id: &ExpenseId, what: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("{what} for expense `{expense_id}` is no longer pending"))
}

#[async_trait::async_trait]
impl ExpenseWorkflowRepository for InMemoryExpenseWorkflowRepository {
    async fn create(&self, workflow: &ExpenseWorkflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.expense.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "expense `{}` already exists",
                workflow.expense.id
            )));
        }
        workflows.insert(workflow.expense.id.0.clone(), workflow.clone());
        Ok(())
    }

    async fn load(&self, id: &ExpenseId) -> Result<Option<ExpenseWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn commit_decision(&self, outcome: &DecisionOutcome) -> Result<(), RepositoryError> {
        let expense_id = &outcome.expense.id;
        let mut workflows = self.workflows.write().await;
        let stored = workflows
            .get_mut(&expense_id.0)
            .ok_or_else(|| conflict(expense_id, "expense status"))?;

        if stored.expense.status != ExpenseStatus::Pending {
            return Err(conflict(expense_id, "expense status"));
        }
        let mut decisions = stored.ledger.decisions().to_vec();
        let slot = decisions
            .iter_mut()
            .find(|decision| decision.id == outcome.decision.id && decision.is_pending())
            .ok_or_else(|| conflict(expense_id, "approval decision"))?;
        *slot = outcome.decision.clone();

        stored.ledger =
            Ledger::from_parts(expense_id.clone(), stored.ledger.policy().clone(), decisions);
        stored.expense = outcome.expense.clone();
        Ok(())
    }

    async fn commit_cancel(&self, expense: &Expense) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        match workflows.get_mut(&expense.id.0) {
            Some(stored)
                if stored.expense.status == ExpenseStatus::Pending
                    && stored.expense.submitted_by == expense.submitted_by =>
            {
                stored.expense = expense.clone();
                Ok(())
            }
            _ => Err(conflict(&expense.id, "expense status")),
        }
    }

    async fn delete_pending(
        &self,
        expense_id: &ExpenseId,
        owner_id: &UserId,
    ) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        let deletable = workflows.get(&expense_id.0).is_some_and(|stored| {
            stored.expense.status == ExpenseStatus::Pending
                && &stored.expense.submitted_by == owner_id
        });
        if !deletable {
            return Err(conflict(expense_id, "expense"));
        }
        workflows.remove(&expense_id.0);
        Ok(())
    }

    async fn list_for_submitter(
        &self,
        submitter_id: &UserId,
        page: Page,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut expenses: Vec<Expense> = workflows
            .values()
            .filter(|workflow| &workflow.expense.submitted_by == submitter_id)
            .map(|workflow| workflow.expense.clone())
            .collect();
        expenses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(expenses, page))
    }

    async fn list_pending_for(
        &self,
        approver_id: &UserId,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError> {
        let mut items = self
            .decisions_of(approver_id, |expense, decision| {
                decision.is_pending() && expense.status == ExpenseStatus::Pending
            })
            .await;
        items.sort_by(|a, b| {
            a.expense
                .created_at
                .cmp(&b.expense.created_at)
                .then_with(|| a.expense.id.cmp(&b.expense.id))
        });
        Ok(paginate(items, page))
    }

    async fn history_for(
        &self,
        approver_id: &UserId,
        status: Option<DecisionStatus>,
        page: Page,
    ) -> Result<Vec<ApprovalQueueItem>, RepositoryError> {
        let mut items = self
            .decisions_of(approver_id, |_, decision| match status {
                Some(status) => decision.status == status,
                None => !decision.is_pending(),
            })
            .await;
        items.sort_by(|a, b| {
            b.decision
                .decided_at
                .cmp(&a.decision.decided_at)
                .then_with(|| a.expense.id.cmp(&b.expense.id))
        });
        Ok(paginate(items, page))
    }

    async fn stats_for(&self, approver_id: &UserId) -> Result<ApprovalStats, RepositoryError> {
        let items = self.decisions_of(approver_id, |_, _| true).await;
        let count = |wanted: DecisionStatus| {
            items.iter().filter(|item| item.decision.status == wanted).count() as u64
        };
        let pending = items
            .iter()
            .filter(|item| {
                item.decision.is_pending() && item.expense.status == ExpenseStatus::Pending
            })
            .count() as u64;
        Ok(ApprovalStats::from_counts(
            pending,
            count(DecisionStatus::Approved),
            count(DecisionStatus::Rejected),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use expensa_core::domain::decision::Verdict;
    use expensa_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use expensa_core::domain::rule::{ApprovalRule, ApproverAssignment, CategoryScope, RuleId};
    use expensa_core::domain::user::{CompanyId, Submitter, User, UserId, UserRole};
    use expensa_core::workflow::{ExpenseWorkflow, WorkflowEngine};

    use crate::repositories::{
        ApprovalRuleRepository, DirectoryRepository, ExpenseWorkflowRepository,
        InMemoryApprovalRuleRepository, InMemoryDirectoryRepository,
        InMemoryExpenseWorkflowRepository, Page, RepositoryError,
    };

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn rule(id: &str, active: bool) -> ApprovalRule {
        ApprovalRule {
            id: RuleId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            name: format!("Rule {id}"),
            description: None,
            amount_range: None,
            categories: CategoryScope::Any,
            manager_approves_first: true,
            sequential: false,
            min_approval_percentage: None,
            priority: 0,
            active,
            created_by: user("u-admin"),
            approvers: vec![ApproverAssignment::new(user("u-fin"), 1)],
        }
    }

    fn workflow(id: &str) -> ExpenseWorkflow {
        let now = Utc::now();
        let expense = Expense {
            id: ExpenseId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: user("u-emp"),
            title: "Team lunch".to_string(),
            description: None,
            amount: Decimal::new(80, 0),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(80, 0),
            category: ExpenseCategory::Meals,
            expense_date: NaiveDate::from_ymd_opt(2026, 9, 3).expect("valid date"),
            status: ExpenseStatus::Pending,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        let submitter = Submitter {
            user_id: user("u-emp"),
            company_id: CompanyId("acme".to_string()),
            manager_id: Some(user("u-mgr")),
        };
        let ledger = WorkflowEngine::new()
            .open(&expense, &submitter, &[rule("rule-any", true)], now)
            .expect("ledger");
        ExpenseWorkflow { expense, ledger }
    }

    #[tokio::test]
    async fn directory_round_trip() {
        let repo = InMemoryDirectoryRepository::default();
        repo.save_company(&CompanyId("acme".to_string()), "Acme", "USD").await.expect("company");
        repo.save_user(User {
            id: user("u-emp"),
            company_id: CompanyId("acme".to_string()),
            name: "Emery".to_string(),
            email: "emery@acme.test".to_string(),
            role: UserRole::Employee,
            manager_id: Some(user("u-mgr")),
            active: true,
        })
        .await
        .expect("save");

        let found = repo.find_user(&user("u-emp")).await.expect("find").expect("exists");
        assert_eq!(found.manager_id, Some(user("u-mgr")));
    }

    #[tokio::test]
    async fn rule_repository_keeps_declaration_order_and_filters_inactive() {
        let repo = InMemoryApprovalRuleRepository::default();
        repo.save(rule("rule-b", true)).await.expect("save");
        repo.save(rule("rule-off", false)).await.expect("save");
        repo.save(rule("rule-a", true)).await.expect("save");
        repo.save(rule("rule-b", true)).await.expect("resave keeps slot");

        let ids: Vec<_> = repo
            .list_active(&CompanyId("acme".to_string()))
            .await
            .expect("list")
            .into_iter()
            .map(|rule| rule.id.0)
            .collect();
        assert_eq!(ids, vec!["rule-b".to_string(), "rule-a".to_string()]);
    }

    #[tokio::test]
    async fn expense_repository_guards_commits() {
        let repo = InMemoryExpenseWorkflowRepository::default();
        let created = workflow("EXP-1");
        repo.create(&created).await.expect("create");
        assert!(matches!(repo.create(&created).await, Err(RepositoryError::Conflict(_))));

        let outcome = WorkflowEngine::new()
            .decide(&created, &user("u-mgr"), Verdict::Approve, None, Utc::now())
            .expect("decide");
        repo.commit_decision(&outcome).await.expect("commit");
        assert!(matches!(
            repo.commit_decision(&outcome).await,
            Err(RepositoryError::Conflict(_))
        ));

        let queue = repo.list_pending_for(&user("u-fin"), Page::first(5)).await.expect("queue");
        assert_eq!(queue.len(), 1);
        let stats = repo.stats_for(&user("u-mgr")).await.expect("stats");
        assert_eq!((stats.approved, stats.total), (1, 1));
    }

    #[tokio::test]
    async fn delete_only_removes_pending_expenses_of_the_owner() {
        let repo = InMemoryExpenseWorkflowRepository::default();
        let pending = workflow("EXP-2");
        repo.create(&pending).await.expect("create");

        let id = ExpenseId("EXP-2".to_string());
        assert!(matches!(
            repo.delete_pending(&id, &user("u-mgr")).await,
            Err(RepositoryError::Conflict(_))
        ));
        repo.delete_pending(&id, &user("u-emp")).await.expect("delete");
        assert!(repo.load(&id).await.expect("load").is_none());
        assert!(matches!(
            repo.delete_pending(&id, &user("u-emp")).await,
            Err(RepositoryError::Conflict(_))
        ));
    }
}
