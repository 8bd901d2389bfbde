pub mod engine;
pub mod evaluator;
pub mod ledger;
pub mod matcher;
pub mod resolver;

pub use engine::{DecisionOutcome, ExpenseWorkflow, WorkflowEngine};
pub use evaluator::{evaluate, CompletionReason, Evaluation};
pub use ledger::Ledger;
pub use matcher::match_rule;
pub use resolver::{resolve, Resolution, ResolvedAssignment};
