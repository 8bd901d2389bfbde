use expensa_core::domain::expense::ExpenseCategory;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let categories: Vec<&str> =
        ExpenseCategory::ALL.iter().map(|category| category.as_str()).collect();
    CommandResult::success_with_data(
        "categories",
        format!("{} expense categories", categories.len()),
        Some(serde_json::json!(categories)),
    )
}
