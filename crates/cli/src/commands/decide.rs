use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::decision::Verdict;
use expensa_core::domain::expense::ExpenseId;
use expensa_core::domain::user::UserId;
use serde_json::json;

use crate::commands::{run_with_service, service_failure, to_data, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct DecideArgs {
    #[arg(long)]
    pub expense: String,
    #[arg(long)]
    pub approver: String,
    /// approve or reject
    #[arg(long)]
    pub verdict: Verdict,
    /// Required when rejecting.
    #[arg(long)]
    pub comments: Option<String>,
}

pub fn run(options: LoadOptions, args: DecideArgs) -> CommandResult {
    run_with_service("decide", options, |_, service| async move {
        let expense_id = ExpenseId(args.expense);
        let outcome = service
            .decide(&expense_id, &UserId(args.approver), args.verdict, args.comments.as_deref())
            .await
            .map_err(service_failure)?;

        let message = format!(
            "decision {} recorded; expense `{}` is {}",
            outcome.decision.status.as_str(),
            expense_id,
            outcome.expense_status().as_str()
        );
        let data = json!({
            "expense_status": outcome.expense_status(),
            "decision": to_data(&outcome.decision)?,
            "evaluation": to_data(&outcome.evaluation)?,
            "ledger": to_data(outcome.ledger.decisions())?,
        });
        Ok::<_, Failure>((message, data))
    })
}
