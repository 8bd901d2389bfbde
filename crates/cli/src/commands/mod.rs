pub mod cancel;
pub mod categories;
pub mod config;
pub mod decide;
pub mod delete;
pub mod expenses;
pub mod ledger;
pub mod migrate;
pub mod queue;
pub mod seed;
pub mod stats;
pub mod submit;

use std::future::Future;
use std::sync::Arc;

use expensa_core::config::{AppConfig, LoadOptions};
use expensa_core::errors::{ApplicationError, InterfaceError};
use expensa_db::repositories::Page;
use expensa_db::{connect_with_config, migrations, ApprovalService, DbPool, ServiceError};
use serde::Serialize;
use serde_json::Value;

use crate::audit::TracingAuditSink;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// `(error_class, message, exit_code)` of a failed command.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects and brings the schema up to date.
pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) fn service_failure(error: ServiceError) -> Failure {
    let class = error.class();
    let interface = ApplicationError::from(error).into_interface("cli");
    let exit_code = match interface {
        InterfaceError::BadRequest { .. } => 10,
        InterfaceError::NotFound { .. } => 11,
        InterfaceError::Conflict { .. } => 12,
        InterfaceError::ServiceUnavailable { .. } => 13,
        InterfaceError::Internal { .. } => 14,
    };
    (class, interface.to_string(), exit_code)
}

pub(crate) fn to_data(value: &(impl Serialize + ?Sized)) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|error| ("serialization", error.to_string(), 1u8))
}

pub(crate) fn page(config: &AppConfig, number: u32, size: Option<u32>) -> Page {
    Page::new(number, size.unwrap_or(config.workflow.page_size))
}

/// Runs one workflow command against the configured database.
pub(crate) fn run_with_service<F, Fut>(
    command: &str,
    options: LoadOptions,
    action: F,
) -> CommandResult
where
    F: FnOnce(AppConfig, ApprovalService) -> Fut,
    Fut: Future<Output = Result<(String, Value), Failure>>,
{
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let service = ApprovalService::sqlite(pool.clone(), Arc::new(TracingAuditSink));
        let outcome = action(config.clone(), service).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
