use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use spendflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries = vec![
        entry("database.url", &config.database.url, &["SPENDFLOW_DATABASE_URL"]),
        entry(
            "database.max_connections",
            &config.database.max_connections,
            &["SPENDFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            &config.database.timeout_secs,
            &["SPENDFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "server.bind_address",
            &config.server.bind_address,
            &["SPENDFLOW_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", &config.server.port, &["SPENDFLOW_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            &config.server.graceful_shutdown_secs,
            &["SPENDFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry("currency.enabled", &config.currency.enabled, &["SPENDFLOW_CURRENCY_ENABLED"]),
        entry(
            "currency.api_base_url",
            &config.currency.api_base_url,
            &["SPENDFLOW_CURRENCY_API_BASE_URL"],
        ),
        entry(
            "currency.timeout_secs",
            &config.currency.timeout_secs,
            &["SPENDFLOW_CURRENCY_TIMEOUT_SECS"],
        ),
        entry(
            "logging.level",
            &config.logging.level,
            &["SPENDFLOW_LOGGING_LEVEL", "SPENDFLOW_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            &format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["SPENDFLOW_LOGGING_FORMAT", "SPENDFLOW_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, value, env_keys)| render_line(key, &value, source(key, env_keys))),
    );
    lines.join("\n")
}

fn entry(
    key: &'static str,
    value: &dyn Display,
    env_keys: &'static [&'static str],
) -> (&'static str, String, &'static [&'static str]) {
    (key, value.to_string(), env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("spendflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/spendflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
