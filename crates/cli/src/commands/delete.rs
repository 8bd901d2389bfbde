use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::expense::ExpenseId;
use expensa_core::domain::user::UserId;
use serde_json::json;

use crate::commands::{run_with_service, service_failure, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct DeleteArgs {
    #[arg(long)]
    pub expense: String,
    /// The submitter removing the expense.
    #[arg(long)]
    pub owner: String,
}

/// Removes a pending expense and its approval ledger.
pub fn run(options: LoadOptions, args: DeleteArgs) -> CommandResult {
    run_with_service("delete", options, |_, service| async move {
        let expense_id = ExpenseId(args.expense);
        service.delete(&expense_id, &UserId(args.owner)).await.map_err(service_failure)?;
        Ok::<_, Failure>((
            format!("expense `{expense_id}` deleted"),
            json!({ "expense_id": expense_id }),
        ))
    })
}
