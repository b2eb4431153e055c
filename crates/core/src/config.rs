use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Effective settings. Every section deserializes with per-field defaults, so
/// a config file only needs the keys it changes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub currency: CurrencyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub currency_enabled: Option<bool>,
    pub currency_api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://spendflow.db?mode=rwc".to_string(),
            max_connections: 5,
            timeout_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 3000, graceful_shutdown_secs: 15 }
    }
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
            timeout_secs: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    /// Layers defaults, the config file, `SPENDFLOW_*` variables and explicit
    /// overrides, in that order, then validates the result.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => read_file(&path)?,
            None if options.require_file => {
                return Err(ConfigError::MissingConfigFile(
                    options.config_path.unwrap_or_else(|| PathBuf::from("spendflow.toml")),
                ));
            }
            None => Self::default(),
        };

        config.layer_env()?;
        config.layer_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn layer_env(&mut self) -> Result<(), ConfigError> {
        layer(&mut self.database.url, env_value(&["SPENDFLOW_DATABASE_URL"])?);
        layer(
            &mut self.database.max_connections,
            env_value(&["SPENDFLOW_DATABASE_MAX_CONNECTIONS"])?,
        );
        layer(&mut self.database.timeout_secs, env_value(&["SPENDFLOW_DATABASE_TIMEOUT_SECS"])?);

        layer(&mut self.server.bind_address, env_value(&["SPENDFLOW_SERVER_BIND_ADDRESS"])?);
        layer(&mut self.server.port, env_value(&["SPENDFLOW_SERVER_PORT"])?);
        layer(
            &mut self.server.graceful_shutdown_secs,
            env_value(&["SPENDFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"])?,
        );

        layer(&mut self.currency.enabled, env_value(&["SPENDFLOW_CURRENCY_ENABLED"])?);
        layer(&mut self.currency.api_base_url, env_value(&["SPENDFLOW_CURRENCY_API_BASE_URL"])?);
        layer(&mut self.currency.timeout_secs, env_value(&["SPENDFLOW_CURRENCY_TIMEOUT_SECS"])?);

        // The short LOG_* names are accepted as aliases.
        layer(
            &mut self.logging.level,
            env_value(&["SPENDFLOW_LOGGING_LEVEL", "SPENDFLOW_LOG_LEVEL"])?,
        );
        layer(
            &mut self.logging.format,
            env_value(&["SPENDFLOW_LOGGING_FORMAT", "SPENDFLOW_LOG_FORMAT"])?,
        );
        Ok(())
    }

    fn layer_overrides(&mut self, overrides: ConfigOverrides) {
        layer(&mut self.database.url, overrides.database_url);
        layer(&mut self.logging.level, overrides.log_level);
        layer(&mut self.server.port, overrides.server_port);
        layer(&mut self.currency.enabled, overrides.currency_enabled);
        layer(&mut self.currency.api_base_url, overrides.currency_api_base_url);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        let url = database.url.trim();
        check(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        check(database.max_connections > 0, "database.max_connections must be greater than zero")?;
        check(
            (1..=300).contains(&database.timeout_secs),
            "database.timeout_secs must be in range 1..=300",
        )?;

        let server = &self.server;
        check(!server.bind_address.trim().is_empty(), "server.bind_address must not be empty")?;
        check(server.port > 0, "server.port must be greater than zero")?;
        check(
            server.graceful_shutdown_secs > 0,
            "server.graceful_shutdown_secs must be greater than zero",
        )?;

        let currency = &self.currency;
        check(
            (1..=60).contains(&currency.timeout_secs),
            "currency.timeout_secs must be in range 1..=60",
        )?;
        let base_url = currency.api_base_url.trim();
        let http_url = base_url.starts_with("http://") || base_url.starts_with("https://");
        check(
            !currency.enabled || http_url,
            "currency.api_base_url must start with http:// or https:// when conversion is enabled",
        )?;

        check(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace|debug|info|warn|error",
        )
    }
}

fn layer<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn check(holds: bool, message: &str) -> Result<(), ConfigError> {
    if holds {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

/// Value of the first non-blank variable among `keys`, parsed as `T`.
fn env_value<T: FromStr>(keys: &[&str]) -> Result<Option<T>, ConfigError> {
    let Some((key, raw)) = keys.iter().find_map(|key| {
        env::var(key).ok().filter(|raw| !raw.trim().is_empty()).map(|raw| (*key, raw))
    }) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw })
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => ["spendflow.toml", "config/spendflow.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    }
}

fn read_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str::<AppConfig>(&interpolate_env_vars(&text)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${VAR}` with the value of `VAR`.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}
