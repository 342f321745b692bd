use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandDefaults;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub commands: CommandsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct CommandsConfig {
    pub app_base_url: String,
    pub stats_default_hours: u32,
    pub descriptor_signing_key: SecretString,
    pub confirmation_ttl_secs: Option<u64>,
    pub search_index_key: SecretString,
}

impl CommandsConfig {
    pub fn defaults(&self) -> CommandDefaults {
        CommandDefaults { stats_default_hours: self.stats_default_hours }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
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
    pub slack_bot_token: Option<String>,
    pub app_base_url: Option<String>,
    pub descriptor_signing_key: Option<String>,
    pub search_index_key: Option<String>,
    pub server_port: Option<u16>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://deskhand.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
            },
            commands: CommandsConfig {
                app_base_url: "http://localhost:3000".to_string(),
                stats_default_hours: 24,
                descriptor_signing_key: String::new().into(),
                confirmation_ttl_secs: None,
                search_index_key: String::new().into(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
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
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("deskhand.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
        }

        if let Some(commands) = patch.commands {
            if let Some(app_base_url) = commands.app_base_url {
                self.commands.app_base_url = app_base_url;
            }
            if let Some(stats_default_hours) = commands.stats_default_hours {
                self.commands.stats_default_hours = stats_default_hours;
            }
            if let Some(signing_key) = commands.descriptor_signing_key {
                self.commands.descriptor_signing_key = secret_value(signing_key);
            }
            if let Some(ttl) = commands.confirmation_ttl_secs {
                self.commands.confirmation_ttl_secs = Some(ttl);
            }
            if let Some(index_key) = commands.search_index_key {
                self.commands.search_index_key = secret_value(index_key);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DESKHAND_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DESKHAND_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("DESKHAND_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DESKHAND_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("DESKHAND_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DESKHAND_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("DESKHAND_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("DESKHAND_COMMANDS_APP_BASE_URL") {
            self.commands.app_base_url = value;
        }
        if let Some(value) = read_env("DESKHAND_COMMANDS_STATS_DEFAULT_HOURS") {
            self.commands.stats_default_hours =
                parse_u32("DESKHAND_COMMANDS_STATS_DEFAULT_HOURS", &value)?;
        }
        if let Some(value) = read_env("DESKHAND_COMMANDS_DESCRIPTOR_SIGNING_KEY") {
            self.commands.descriptor_signing_key = secret_value(value);
        }
        if let Some(value) = read_env("DESKHAND_COMMANDS_CONFIRMATION_TTL_SECS") {
            self.commands.confirmation_ttl_secs =
                Some(parse_u64("DESKHAND_COMMANDS_CONFIRMATION_TTL_SECS", &value)?);
        }
        if let Some(value) = read_env("DESKHAND_COMMANDS_SEARCH_INDEX_KEY") {
            self.commands.search_index_key = secret_value(value);
        }

        if let Some(value) = read_env("DESKHAND_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DESKHAND_SERVER_PORT") {
            self.server.port = parse_u16("DESKHAND_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DESKHAND_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DESKHAND_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("DESKHAND_LOGGING_LEVEL").or_else(|| read_env("DESKHAND_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DESKHAND_LOGGING_FORMAT").or_else(|| read_env("DESKHAND_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(app_base_url) = overrides.app_base_url {
            self.commands.app_base_url = app_base_url;
        }
        if let Some(signing_key) = overrides.descriptor_signing_key {
            self.commands.descriptor_signing_key = secret_value(signing_key);
        }
        if let Some(index_key) = overrides.search_index_key {
            self.commands.search_index_key = secret_value(index_key);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_commands(&self.commands)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("deskhand.toml"), PathBuf::from("config/deskhand.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if !is_http_url(&slack.api_base_url) {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_commands(commands: &CommandsConfig) -> Result<(), ConfigError> {
    if !is_http_url(&commands.app_base_url) {
        return Err(ConfigError::Validation(
            "commands.app_base_url must start with http:// or https://".to_string(),
        ));
    }

    if commands.stats_default_hours == 0 {
        return Err(ConfigError::Validation(
            "commands.stats_default_hours must be greater than zero".to_string(),
        ));
    }

    if commands.descriptor_signing_key.expose_secret().trim().len() < 16 {
        return Err(ConfigError::Validation(
            "commands.descriptor_signing_key is required and must be at least 16 characters"
                .to_string(),
        ));
    }

    if commands.search_index_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "commands.search_index_key is required to query the encrypted search index"
                .to_string(),
        ));
    }

    if commands.confirmation_ttl_secs == Some(0) {
        return Err(ConfigError::Validation(
            "commands.confirmation_ttl_secs must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    commands: Option<CommandsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandsPatch {
    app_base_url: Option<String>,
    stats_default_hours: Option<u32>,
    descriptor_signing_key: Option<String>,
    confirmation_ttl_secs: Option<u64>,
    search_index_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
