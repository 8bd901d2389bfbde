use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::user::UserId;

use crate::commands::{
    page, run_with_service, service_failure, to_data, CommandResult, Failure,
};

#[derive(Clone, Debug, Args)]
pub struct ExpensesArgs {
    #[arg(long)]
    pub submitter: String,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long)]
    pub page_size: Option<u32>,
}

/// The submitter's own expenses, newest first.
pub fn run(options: LoadOptions, args: ExpensesArgs) -> CommandResult {
    run_with_service("expenses", options, |config, service| async move {
        let page = page(&config, args.page, args.page_size);
        let expenses = service
            .expenses_of(&UserId(args.submitter.clone()), page)
            .await
            .map_err(service_failure)?;
        let message = format!("{} expense(s) filed by `{}`", expenses.len(), args.submitter);
        Ok::<_, Failure>((message, to_data(&expenses)?))
    })
}
