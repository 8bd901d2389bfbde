pub mod audit;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use expensa_core::config::{AppConfig, ConfigOverrides, LoadOptions};

use commands::cancel::CancelArgs;
use commands::decide::DecideArgs;
use commands::delete::DeleteArgs;
use commands::expenses::ExpensesArgs;
use commands::ledger::LedgerArgs;
use commands::queue::{HistoryArgs, PendingArgs};
use commands::stats::StatsArgs;
use commands::submit::SubmitArgs;

#[derive(Debug, Parser)]
#[command(
    name = "expensa",
    about = "Expensa expense approval CLI",
    long_about = "Submit expenses, route them through approval rules and record approver decisions.",
    after_help = "Examples:\n  expensa migrate\n  expensa seed\n  expensa submit --submitter u-emp --title Flight --amount 420 --category travel\n  expensa pending --approver u-mgr"
)]
pub struct Cli {
    /// Config file; defaults to expensa.toml or config/expensa.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides database.url.
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the demo company, users and approval rules")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "List the supported expense categories")]
    Categories,
    #[command(about = "Submit an expense and route it to its approvers")]
    Submit(SubmitArgs),
    #[command(about = "Approve or reject an expense as one of its approvers")]
    Decide(DecideArgs),
    #[command(about = "Withdraw a pending expense you submitted")]
    Cancel(CancelArgs),
    #[command(about = "Delete a pending expense you submitted, with its approvals")]
    Delete(DeleteArgs),
    #[command(about = "Show an expense with every approver decision")]
    Ledger(LedgerArgs),
    #[command(about = "List expenses waiting on an approver")]
    Pending(PendingArgs),
    #[command(about = "List decisions an approver already made")]
    History(HistoryArgs),
    #[command(about = "List expenses filed by a submitter")]
    Expenses(ExpensesArgs),
    #[command(about = "Summarize an approver's decisions by status")]
    Stats(StatsArgs),
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();
    init_logging(&options);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Config => commands::config::run(options),
        Command::Categories => commands::categories::run(),
        Command::Submit(args) => commands::submit::run(options, args),
        Command::Decide(args) => commands::decide::run(options, args),
        Command::Cancel(args) => commands::cancel::run(options, args),
        Command::Delete(args) => commands::delete::run(options, args),
        Command::Ledger(args) => commands::ledger::run(options, args),
        Command::Pending(args) => commands::queue::pending(options, args),
        Command::History(args) => commands::queue::history(options, args),
        Command::Expenses(args) => commands::expenses::run(options, args),
        Command::Stats(args) => commands::stats::run(options, args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays one JSON line per command. An invalid
/// config still gets default logging; the command itself reports the error.
fn init_logging(options: &LoadOptions) {
    use expensa_core::config::LogFormat::*;
    use tracing::Level;

    let config = AppConfig::load(options.clone()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
