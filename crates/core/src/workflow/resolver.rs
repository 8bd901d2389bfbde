use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::decision::WorkflowPolicy;
use crate::domain::expense::Expense;
use crate::domain::rule::{ApprovalRule, RuleId};
use crate::domain::user::{Submitter, UserId};
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAssignment {
    pub approver_id: UserId,
    pub sequence: u32,
    pub required: bool,
    pub rule_id: Option<RuleId>,
}

/// The approvers an expense needs, plus the policy the ledger is judged by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub policy: WorkflowPolicy,
    pub assignments: Vec<ResolvedAssignment>,
}

pub fn resolve(
    expense: &Expense,
    submitter: &Submitter,
    rule: Option<&ApprovalRule>,
) -> Result<Resolution, WorkflowError> {
    let no_policy = || WorkflowError::NoApplicablePolicy {
        expense_id: expense.id.clone(),
        submitter_id: submitter.user_id.clone(),
    };

    let Some(rule) = rule else {
        let manager_id = submitter.manager_id.clone().ok_or_else(no_policy)?;
        return Ok(Resolution {
            policy: WorkflowPolicy::manager_fallback(),
            assignments: vec![ResolvedAssignment {
                approver_id: manager_id,
                sequence: 1,
                required: true,
                rule_id: None,
            }],
        });
    };

    let mut assignments = Vec::new();
    let mut assigned: HashSet<UserId> = HashSet::new();
    let mut sequence = 1;

    if rule.manager_approves_first {
        if let Some(manager_id) = &submitter.manager_id {
            assigned.insert(manager_id.clone());
            assignments.push(ResolvedAssignment {
                approver_id: manager_id.clone(),
                sequence,
                required: true,
                rule_id: Some(rule.id.clone()),
            });
            sequence += 1;
        }
    }

    for template in rule.ordered_approvers() {
        if !template.applies_to(expense.converted_amount, expense.category) {
            continue;
        }
        // A repeated approver keeps its first slot, required if any entry is.
        if !assigned.insert(template.approver_id.clone()) {
            if let Some(existing) =
                assignments.iter_mut().find(|a| a.approver_id == template.approver_id)
            {
                existing.required |= template.required;
            }
            continue;
        }
        assignments.push(ResolvedAssignment {
            approver_id: template.approver_id.clone(),
            sequence,
            required: template.required,
            rule_id: Some(rule.id.clone()),
        });
        sequence += 1;
    }

    if assignments.is_empty() {
        return Err(no_policy());
    }

    Ok(Resolution { policy: WorkflowPolicy::from_rule(rule), assignments })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::resolve;
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use crate::domain::rule::{ApprovalRule, ApproverAssignment, CategoryScope, RuleId};
    use crate::domain::user::{CompanyId, Submitter, UserId};
    use crate::errors::WorkflowError;

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn expense() -> Expense {
        let now = Utc::now();
        Expense {
            id: ExpenseId("EXP-7".to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: user("u-emp"),
            title: "Hotel".to_string(),
            description: None,
            amount: Decimal::new(500, 0),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(500, 0),
            category: ExpenseCategory::Travel,
            expense_date: NaiveDate::from_ymd_opt(2026, 6, 1).expect("valid date"),
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

    fn rule(approvers: Vec<ApproverAssignment>) -> ApprovalRule {
        ApprovalRule {
            id: RuleId("R-travel".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "Travel".to_string(),
            description: None,
            amount_range: None,
            categories: CategoryScope::Any,
            manager_approves_first: true,
            sequential: true,
            min_approval_percentage: None,
            priority: 0,
            active: true,
            created_by: user("u-admin"),
            approvers,
        }
    }

    #[test]
    fn fallback_assigns_the_manager_alone() {
        let resolution = resolve(&expense(), &submitter(Some("u-mgr")), None).expect("resolve");
        assert_eq!(resolution.assignments.len(), 1);
        assert_eq!(resolution.assignments[0].approver_id, user("u-mgr"));
        assert_eq!(resolution.assignments[0].sequence, 1);
        assert!(resolution.assignments[0].required);
        assert!(resolution.policy.rule_id.is_none());
    }

    #[test]
    fn fallback_without_manager_is_a_policy_gap() {
        let error = resolve(&expense(), &submitter(None), None).expect_err("no approver");
        assert!(matches!(error, WorkflowError::NoApplicablePolicy { .. }));
    }

    #[test]
    fn manager_first_then_rule_approvers_in_sequence_order() {
        let rule = rule(vec![
            ApproverAssignment::new(user("u-cfo"), 2),
            ApproverAssignment::new(user("u-fin"), 1).optional(),
        ]);
        let resolution =
            resolve(&expense(), &submitter(Some("u-mgr")), Some(&rule)).expect("resolve");

        let ordered: Vec<(&str, u32, bool)> = resolution
            .assignments
            .iter()
            .map(|a| (a.approver_id.0.as_str(), a.sequence, a.required))
            .collect();
        assert_eq!(ordered, vec![("u-mgr", 1, true), ("u-fin", 2, false), ("u-cfo", 3, true)]);
        assert!(resolution.assignments.iter().all(|a| a.rule_id == Some(rule.id.clone())));
        assert!(resolution.policy.sequential);
    }

    #[test]
    fn manager_is_not_assigned_twice() {
        let rule = rule(vec![ApproverAssignment::new(user("u-mgr"), 1)]);
        let resolution =
            resolve(&expense(), &submitter(Some("u-mgr")), Some(&rule)).expect("resolve");
        assert_eq!(resolution.assignments.len(), 1);
    }

    #[test]
    fn repeated_approver_keeps_the_strongest_required_flag() {
        let mut rule = rule(vec![
            ApproverAssignment::new(user("u-fin"), 1).optional(),
            ApproverAssignment::new(user("u-cfo"), 2).optional(),
            ApproverAssignment::new(user("u-fin"), 3),
        ]);
        rule.manager_approves_first = false;

        let resolution = resolve(&expense(), &submitter(None), Some(&rule)).expect("resolve");
        let ordered: Vec<(&str, u32, bool)> = resolution
            .assignments
            .iter()
            .map(|a| (a.approver_id.0.as_str(), a.sequence, a.required))
            .collect();
        assert_eq!(ordered, vec![("u-fin", 1, true), ("u-cfo", 2, false)]);
    }

    #[test]
    fn filtered_templates_are_skipped() {
        let mut big_spend = ApproverAssignment::new(user("u-cfo"), 1);
        big_spend.min_amount = Some(Decimal::new(5_000, 0));
        let mut rule = rule(vec![big_spend, ApproverAssignment::new(user("u-fin"), 2)]);
        rule.manager_approves_first = false;

        let resolution = resolve(&expense(), &submitter(None), Some(&rule)).expect("resolve");
        assert_eq!(resolution.assignments.len(), 1);
        assert_eq!(resolution.assignments[0].approver_id, user("u-fin"));
        assert_eq!(resolution.assignments[0].sequence, 1);
    }

    #[test]
    fn rule_resolving_to_nobody_is_a_policy_gap() {
        let rule = rule(Vec::new());
        let error = resolve(&expense(), &submitter(None), Some(&rule)).expect_err("empty");
        assert!(matches!(error, WorkflowError::NoApplicablePolicy { .. }));
    }
}
