use expensa_core::config::LoadOptions;
use expensa_db::{DemoSeedDataset, SeedResult};

use crate::commands::{
    build_runtime, load_config, open_database, to_data, CommandResult, Failure,
};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, Failure> = if verification.all_present {
            Ok(seed_result)
        } else {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => {
            let rule_lines: Vec<String> = seeded
                .rules_seeded
                .iter()
                .map(|rule| format!("  - {}: {}", rule.rule_id, rule.description))
                .collect();
            let message = format!(
                "demo dataset loaded for company `{}` with {} users and rules:\n{}",
                seeded.company_id,
                seeded.users_seeded.len(),
                rule_lines.join("\n")
            );
            match to_data(&seeded) {
                Ok(data) => CommandResult::success_with_data("seed", message, Some(data)),
                Err((error_class, message, exit_code)) => {
                    CommandResult::failure("seed", error_class, message, exit_code)
                }
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["user:u-emp", "rule:rule-travel:approvers"]),
            "seed verification failed for checks: user:u-emp, rule:rule-travel:approvers"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "some seed data failed to load");
    }
}
