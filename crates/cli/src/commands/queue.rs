use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::decision::DecisionStatus;
use expensa_core::domain::user::UserId;

use crate::commands::{
    page, run_with_service, service_failure, to_data, CommandResult, Failure,
};

#[derive(Clone, Debug, Args)]
pub struct PendingArgs {
    #[arg(long)]
    pub approver: String,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long)]
    pub page_size: Option<u32>,
}

#[derive(Clone, Debug, Args)]
pub struct HistoryArgs {
    #[arg(long)]
    pub approver: String,
    /// Only decisions with this status (approved or rejected).
    #[arg(long)]
    pub status: Option<DecisionStatus>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long)]
    pub page_size: Option<u32>,
}

/// Decisions awaiting the approver, oldest expense first.
pub fn pending(options: LoadOptions, args: PendingArgs) -> CommandResult {
    run_with_service("pending", options, |config, service| async move {
        let page = page(&config, args.page, args.page_size);
        let items = service
            .pending_for(&UserId(args.approver.clone()), page)
            .await
            .map_err(service_failure)?;
        let message = format!("{} pending approval(s) for `{}`", items.len(), args.approver);
        Ok::<_, Failure>((message, to_data(&items)?))
    })
}

/// Decisions the approver already made, most recent first.
pub fn history(options: LoadOptions, args: HistoryArgs) -> CommandResult {
    run_with_service("history", options, |config, service| async move {
        let page = page(&config, args.page, args.page_size);
        let items = service
            .history_for(&UserId(args.approver.clone()), args.status, page)
            .await
            .map_err(service_failure)?;
        let message = format!("{} decided approval(s) for `{}`", items.len(), args.approver);
        Ok::<_, Failure>((message, to_data(&items)?))
    })
}
