use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::expense::ExpenseId;

use crate::commands::{run_with_service, service_failure, to_data, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct LedgerArgs {
    #[arg(long)]
    pub expense: String,
}

pub fn run(options: LoadOptions, args: LedgerArgs) -> CommandResult {
    run_with_service("ledger", options, |_, service| async move {
        let workflow =
            service.workflow(&ExpenseId(args.expense)).await.map_err(service_failure)?;
        let message = format!(
            "expense `{}` is {} with {} decision(s)",
            workflow.expense.id,
            workflow.expense.status.as_str(),
            workflow.ledger.decisions().len()
        );
        Ok::<_, Failure>((message, to_data(&workflow)?))
    })
}
