//! Configuration loader and validator for the starboard daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub app: App,
    pub discord: Discord,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct App {
    pub data_dir: String,
    /// Guild configuration snapshot, relative to `data_dir` unless absolute.
    pub guilds_file: String,
    /// Name of the webhook used to post mirrors in every starboard channel.
    pub webhook_name: String,
    pub self_star_allowed: bool,
}

/// Discord API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Discord {
    pub bot_token: String,
    pub api_base: String,
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn guilds_path(&self) -> PathBuf {
        let file = Path::new(&self.guilds_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            Path::new(&self.resolved_data_dir()).join(file)
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/breadboard.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.guilds_file.trim().is_empty() {
        return Err(invalid("app.guilds_file must be non-empty"));
    }
    if cfg.app.webhook_name.trim().is_empty() {
        return Err(invalid("app.webhook_name must be non-empty"));
    }
    // Discord caps webhook names at 80 characters.
    if cfg.app.webhook_name.chars().count() > 80 {
        return Err(invalid("app.webhook_name must be at most 80 characters"));
    }

    if cfg.discord.bot_token.trim().is_empty() {
        return Err(invalid("discord.bot_token must be non-empty"));
    }
    if !cfg.discord.api_base.starts_with("http") || !cfg.discord.api_base.ends_with('/') {
        return Err(invalid(
            "discord.api_base must be an http(s) URL ending with '/'",
        ));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  guilds_file: "guilds.yaml"
  webhook_name: "Starboard"
  self_star_allowed: false

discord:
  bot_token: "YOUR_DISCORD_BOT_TOKEN"
  api_base: "https://discord.com/api/v10/"
"#
}
