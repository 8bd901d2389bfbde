use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::user::UserId;

use crate::commands::{run_with_service, service_failure, to_data, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct StatsArgs {
    #[arg(long)]
    pub approver: String,
}

pub fn run(options: LoadOptions, args: StatsArgs) -> CommandResult {
    run_with_service("stats", options, |_, service| async move {
        let stats =
            service.stats_for(&UserId(args.approver.clone())).await.map_err(service_failure)?;
        let message = format!(
            "`{}`: {} pending, {} approved, {} rejected",
            args.approver, stats.pending, stats.approved, stats.rejected
        );
        Ok::<_, Failure>((message, to_data(&stats)?))
    })
}
