use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::expense::ExpenseId;
use expensa_core::domain::user::UserId;

use crate::commands::{run_with_service, service_failure, to_data, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct CancelArgs {
    #[arg(long)]
    pub expense: String,
    /// The submitter withdrawing the expense.
    #[arg(long)]
    pub owner: String,
}

pub fn run(options: LoadOptions, args: CancelArgs) -> CommandResult {
    run_with_service("cancel", options, |_, service| async move {
        let expense = service
            .cancel(&ExpenseId(args.expense), &UserId(args.owner))
            .await
            .map_err(service_failure)?;
        Ok::<_, Failure>((format!("expense `{}` cancelled", expense.id), to_data(&expense)?))
    })
}
