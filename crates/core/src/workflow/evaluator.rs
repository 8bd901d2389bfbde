use serde::{Deserialize, Serialize};

use crate::domain::decision::DecisionStatus;
use crate::domain::expense::ExpenseStatus;
use crate::workflow::ledger::Ledger;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The expense was already terminal; evaluation did nothing.
    AlreadyTerminal,
    AnyRejected,
    RequiredApproved,
    PercentageReached,
    AwaitingDecisions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub status: ExpenseStatus,
    pub reason: CompletionReason,
    pub approved: usize,
    pub rejected: usize,
    pub total: usize,
}

impl Evaluation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Derives the expense status from its ledger.
///
/// A status that is already terminal is returned unchanged, so evaluating the
/// same ledger twice, or a ledger that already resolved, never moves the
/// expense backwards.
pub fn evaluate(current: ExpenseStatus, ledger: &Ledger) -> Evaluation {
    let decisions = ledger.decisions();
    let approved = ledger.count(DecisionStatus::Approved);
    let rejected = ledger.count(DecisionStatus::Rejected);
    let total = decisions.len();
    let outcome = |status, reason| Evaluation { status, reason, approved, rejected, total };

    if current.is_terminal() {
        return outcome(current, CompletionReason::AlreadyTerminal);
    }

    if rejected > 0 {
        return outcome(ExpenseStatus::Rejected, CompletionReason::AnyRejected);
    }

    // A ledger with no decision flagged as required needs every decision.
    let any_required = decisions.iter().any(|decision| decision.required);
    let required_approved = decisions
        .iter()
        .filter(|decision| decision.required || !any_required)
        .all(|decision| decision.status == DecisionStatus::Approved);
    if total > 0 && required_approved {
        return outcome(ExpenseStatus::Approved, CompletionReason::RequiredApproved);
    }

    if let Some(threshold) = ledger.policy().min_approval_percentage {
        // approved / total * 100 >= threshold, without rounding
        if total > 0 && approved * 100 >= usize::from(threshold) * total {
            return outcome(ExpenseStatus::Approved, CompletionReason::PercentageReached);
        }
    }

    outcome(ExpenseStatus::Pending, CompletionReason::AwaitingDecisions)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{evaluate, CompletionReason};
    use crate::domain::decision::{Verdict, WorkflowPolicy};
    use crate::domain::expense::{ExpenseId, ExpenseStatus};
    use crate::domain::user::UserId;
    use crate::workflow::ledger::Ledger;
    use crate::workflow::resolver::{ResolvedAssignment, Resolution};

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn ledger(entries: &[(&str, bool)], min_approval_percentage: Option<u8>) -> Ledger {
        let assignments = entries
            .iter()
            .enumerate()
            .map(|(index, (id, required))| ResolvedAssignment {
                approver_id: user(id),
                sequence: index as u32 + 1,
                required: *required,
                rule_id: None,
            })
            .collect();
        let policy = WorkflowPolicy { min_approval_percentage, ..WorkflowPolicy::default() };
        Ledger::open(ExpenseId("EXP-1".to_string()), Resolution { policy, assignments }, Utc::now())
    }

    #[test]
    fn single_rejection_rejects_regardless_of_approvals() {
        let mut ledger = ledger(&[("a", true), ("b", true), ("c", false)], Some(10));
        ledger.record(&user("a"), Verdict::Approve, None, Utc::now()).expect("a");
        ledger.record(&user("b"), Verdict::Approve, None, Utc::now()).expect("b");
        ledger.record(&user("c"), Verdict::Reject, Some("duplicate receipt"), Utc::now()).expect("c");

        let evaluation = evaluate(ExpenseStatus::Pending, &ledger);
        assert_eq!(evaluation.status, ExpenseStatus::Rejected);
        assert_eq!(evaluation.reason, CompletionReason::AnyRejected);
    }

    #[test]
    fn required_approvals_complete_even_with_optional_pending() {
        let mut ledger = ledger(&[("a", true), ("b", false)], None);
        ledger.record(&user("a"), Verdict::Approve, None, Utc::now()).expect("a");

        let evaluation = evaluate(ExpenseStatus::Pending, &ledger);
        assert_eq!(evaluation.status, ExpenseStatus::Approved);
        assert_eq!(evaluation.reason, CompletionReason::RequiredApproved);
    }

    #[test]
    fn percentage_counts_all_decisions() {
        let mut ledger = ledger(&[("a", false), ("b", false), ("c", false)], Some(60));
        ledger.record(&user("a"), Verdict::Approve, None, Utc::now()).expect("a");
        assert_eq!(evaluate(ExpenseStatus::Pending, &ledger).status, ExpenseStatus::Pending);

        ledger.record(&user("b"), Verdict::Approve, None, Utc::now()).expect("b");
        let evaluation = evaluate(ExpenseStatus::Pending, &ledger);
        assert_eq!(evaluation.status, ExpenseStatus::Approved);
        assert_eq!(evaluation.reason, CompletionReason::PercentageReached);
        assert_eq!((evaluation.approved, evaluation.total), (2, 3));
    }

    #[test]
    fn all_optional_ledger_without_percentage_needs_every_approval() {
        let mut ledger = ledger(&[("a", false), ("b", false)], None);
        ledger.record(&user("a"), Verdict::Approve, None, Utc::now()).expect("a");
        assert_eq!(evaluate(ExpenseStatus::Pending, &ledger).status, ExpenseStatus::Pending);

        ledger.record(&user("b"), Verdict::Approve, None, Utc::now()).expect("b");
        let evaluation = evaluate(ExpenseStatus::Pending, &ledger);
        assert_eq!(evaluation.status, ExpenseStatus::Approved);
        assert_eq!(evaluation.reason, CompletionReason::RequiredApproved);
    }

    #[test]
    fn percentage_below_threshold_stays_pending() {
        let mut ledger = ledger(&[("a", true), ("b", true), ("c", true)], Some(67));
        ledger.record(&user("a"), Verdict::Approve, None, Utc::now()).expect("a");
        ledger.record(&user("b"), Verdict::Approve, None, Utc::now()).expect("b");

        let evaluation = evaluate(ExpenseStatus::Pending, &ledger);
        assert_eq!(evaluation.status, ExpenseStatus::Pending);
        assert_eq!(evaluation.reason, CompletionReason::AwaitingDecisions);
    }

    #[test]
    fn terminal_status_is_never_revisited() {
        let mut ledger = ledger(&[("a", true)], None);
        ledger.record(&user("a"), Verdict::Reject, Some("out of policy"), Utc::now()).expect("a");

        let first = evaluate(ExpenseStatus::Pending, &ledger);
        let again = evaluate(first.status, &ledger);
        assert_eq!(again.status, ExpenseStatus::Rejected);
        assert_eq!(again.reason, CompletionReason::AlreadyTerminal);

        let approved = evaluate(ExpenseStatus::Approved, &ledger);
        assert_eq!(approved.status, ExpenseStatus::Approved);
    }

    #[test]
    fn evaluation_is_idempotent_for_pending_ledgers() {
        let ledger = ledger(&[("a", true), ("b", true)], None);
        assert_eq!(evaluate(ExpenseStatus::Pending, &ledger), evaluate(ExpenseStatus::Pending, &ledger));
    }
}
