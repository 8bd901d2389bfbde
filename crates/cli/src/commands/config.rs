use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expensa_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigLine {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let flag_database_url = options.overrides.database_url.is_some();
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let lines = effective_lines(&config, config_file_doc.as_ref(), config_file_path.as_deref())
        .into_iter()
        .map(|mut line| {
            if flag_database_url && line.key == "database.url" {
                line.source = "flag (--database-url)".to_string();
            }
            line
        })
        .collect::<Vec<_>>();

    let mut rendered =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    rendered.extend(lines.iter().map(render_line));

    let data = serde_json::to_value(&lines).ok();
    CommandResult::success_with_data("config", rendered.join("\n"), data)
}

fn effective_lines(
    config: &AppConfig,
    doc: Option<&Value>,
    path: Option<&Path>,
) -> Vec<ConfigLine> {
    let fields: [(&'static str, &[&str], String); 7] = [
        ("database.url", &["EXPENSA_DATABASE_URL"], config.database.url.clone()),
        (
            "database.max_connections",
            &["EXPENSA_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            &["EXPENSA_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        (
            "workflow.base_currency",
            &["EXPENSA_WORKFLOW_BASE_CURRENCY"],
            config.workflow.base_currency.clone(),
        ),
        (
            "workflow.page_size",
            &["EXPENSA_WORKFLOW_PAGE_SIZE"],
            config.workflow.page_size.to_string(),
        ),
        (
            "logging.level",
            &["EXPENSA_LOGGING_LEVEL", "EXPENSA_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        (
            "logging.format",
            &["EXPENSA_LOGGING_FORMAT", "EXPENSA_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ];

    fields
        .into_iter()
        .map(|(key, env_keys, value)| ConfigLine {
            key,
            value,
            source: field_source(key, env_keys, doc, path),
        })
        .collect()
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("expensa.toml"), PathBuf::from("config/expensa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(line: &ConfigLine) -> String {
    format!("- {} = {} (source: {})", line.key, line.value, line.source)
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[workflow]\nbase_currency = \"EUR\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.base_currency"));
        assert!(!contains_path(&doc, "workflow.page_size"));
        assert!(!contains_path(&doc, "logging.level"));
    }

    #[test]
    fn file_source_names_the_file() {
        let doc: toml::Value = "[workflow]\npage_size = 25\n".parse().expect("toml");
        let source = field_source(
            "workflow.page_size",
            &["EXPENSA_TEST_UNSET_PAGE_SIZE"],
            Some(&doc),
            Some(std::path::Path::new("config/expensa.toml")),
        );
        assert_eq!(source, "file (config/expensa.toml)");

        let source =
            field_source("workflow.base_currency", &["EXPENSA_TEST_UNSET_CURRENCY"], None, None);
        assert_eq!(source, "default");
    }
}
