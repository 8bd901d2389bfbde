use crate::domain::expense::Expense;
use crate::domain::rule::ApprovalRule;

/// Picks the rule that governs `expense`.
///
/// Only active rules belonging to the expense's company are considered. They
/// are tried by descending priority; rules with equal priority keep the order
/// they were declared in. The first rule whose amount range and category scope
/// both cover the expense wins.
pub fn match_rule<'a>(expense: &Expense, rules: &'a [ApprovalRule]) -> Option<&'a ApprovalRule> {
    candidate_rules(expense, rules)
        .into_iter()
        .find(|rule| rule.matches(expense.converted_amount, expense.category))
}

/// Active rules of the expense's company in evaluation order.
pub fn candidate_rules<'a>(expense: &Expense, rules: &'a [ApprovalRule]) -> Vec<&'a ApprovalRule> {
    let mut candidates: Vec<&ApprovalRule> = rules
        .iter()
        .filter(|rule| rule.active && rule.company_id == expense.company_id)
        .collect();
    candidates.sort_by(|left, right| right.priority.cmp(&left.priority));
    candidates
}
