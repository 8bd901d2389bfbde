use chrono::{NaiveDate, Utc};
use clap::Args;
use expensa_core::config::LoadOptions;
use expensa_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
use expensa_core::domain::user::UserId;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::commands::{run_with_service, service_failure, to_data, CommandResult, Failure};

#[derive(Clone, Debug, Args)]
pub struct SubmitArgs {
    /// User filing the expense.
    #[arg(long)]
    pub submitter: String,
    #[arg(long)]
    pub title: String,
    /// Amount in the currency the expense was incurred in.
    #[arg(long)]
    pub amount: Decimal,
    #[arg(long)]
    pub category: ExpenseCategory,
    /// ISO currency code; defaults to the company currency.
    #[arg(long)]
    pub currency: Option<String>,
    /// Amount in the company currency. Required for foreign-currency expenses.
    #[arg(long)]
    pub converted_amount: Option<Decimal>,
    /// Date the expense was incurred (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
    #[arg(long)]
    pub description: Option<String>,
    /// Explicit expense id; generated when omitted.
    #[arg(long)]
    pub id: Option<String>,
}

pub fn run(options: LoadOptions, args: SubmitArgs) -> CommandResult {
    run_with_service("submit", options, |config, service| async move {
        let base_currency = config.workflow.base_currency.to_ascii_uppercase();
        let currency = args
            .currency
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| base_currency.clone());
        let converted_amount = converted_amount(&args, &currency, &base_currency)?;

        let submitter = service
            .submitter(&UserId(args.submitter.clone()))
            .await
            .map_err(service_failure)?;

        let now = Utc::now();
        let expense = Expense {
            id: ExpenseId(args.id.unwrap_or_else(|| format!("EXP-{}", Uuid::new_v4().simple()))),
            company_id: submitter.company_id.clone(),
            submitted_by: submitter.id.clone(),
            title: args.title,
            description: args.description,
            amount: args.amount,
            currency,
            converted_amount,
            category: args.category,
            expense_date: args.date.unwrap_or_else(|| now.date_naive()),
            status: ExpenseStatus::Pending,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        let expense_id = expense.id.clone();

        let decisions = service.submit_expense(expense).await.map_err(service_failure)?;
        let message = format!(
            "expense `{expense_id}` submitted with {} approver(s)",
            decisions.len()
        );
        let data = json!({
            "expense_id": expense_id,
            "decisions": to_data(&decisions)?,
        });
        Ok::<_, Failure>((message, data))
    })
}

fn converted_amount(
    args: &SubmitArgs,
    currency: &str,
    base_currency: &str,
) -> Result<Decimal, Failure> {
    match args.converted_amount {
        Some(amount) => Ok(amount),
        None if currency == base_currency => Ok(args.amount),
        None => Err((
            "invalid_input",
            format!(
                "expense in {currency} needs --converted-amount in the company currency {base_currency}"
            ),
            10,
        )),
    }
}

#[cfg(test)]
mod tests {
    use expensa_core::domain::expense::ExpenseCategory;
    use rust_decimal::Decimal;

    use super::{converted_amount, SubmitArgs};

    fn args(converted: Option<Decimal>) -> SubmitArgs {
        SubmitArgs {
            submitter: "u-emp".to_string(),
            title: "Flight".to_string(),
            amount: Decimal::new(42_000, 2),
            category: ExpenseCategory::Travel,
            currency: None,
            converted_amount: converted,
            date: None,
            description: None,
            id: None,
        }
    }

    #[test]
    fn base_currency_amount_is_used_as_is() {
        let amount = converted_amount(&args(None), "USD", "USD").expect("same currency");
        assert_eq!(amount, Decimal::new(42_000, 2));
    }

    #[test]
    fn foreign_currency_requires_a_converted_amount() {
        let (class, message, code) =
            converted_amount(&args(None), "EUR", "USD").expect_err("missing conversion");
        assert_eq!((class, code), ("invalid_input", 10));
        assert!(message.contains("EUR"));

        let amount =
            converted_amount(&args(Some(Decimal::new(455, 0))), "EUR", "USD").expect("given");
        assert_eq!(amount, Decimal::new(455, 0));
    }
}
