//! Launcher configuration (`brood.toml`).
//!
//! Resolution order: `--config` / `BROOD_CONFIG_PATH`, then `./brood.toml`,
//! then built-in defaults. Environment overrides are applied after the file
//! and before validation.

use brood::{Error, LaunchOptions, Result, SupervisorConfig, TerminationConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "brood.toml";

pub const ENV_CONFIG_PATH: &str = "BROOD_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "BROOD_LOG_LEVEL";
pub const ENV_ENVIRONMENT: &str = "BROOD_ENVIRONMENT";
pub const ENV_CLOSE_TIMEOUT_SECS: &str = "BROOD_CLOSE_TIMEOUT_SECS";
pub const ENV_SIGNAL: &str = "BROOD_SIGNAL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Complete launcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// The server process started by `brood start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Program to run. Required by `start`.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Runtime mode exported to the server, e.g. `development`.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Variable the runtime mode is exported as.
    #[serde(default = "default_environment_variable")]
    pub environment_variable: String,

    /// Pass the launcher's own environment on to the server.
    #[serde(default = "default_true")]
    pub inherit_environment: bool,

    /// Text on stdout that signals the server is up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_marker: Option<String>,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub show_echo: bool,

    /// Extra variables; these win over inherited ones.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            working_directory: None,
            environment: default_environment(),
            environment_variable: default_environment_variable(),
            inherit_environment: true,
            ready_marker: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            show_echo: true,
            env: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_environment_variable() -> String {
    "NODE_ENV".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Launch options for the server process.
    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::default()
            .envs(self.env.clone())
            .env(&self.environment_variable, &self.environment)
            .show_echo(self.show_echo);

        if self.inherit_environment {
            options = options.inherit_environment();
        }
        if let Some(dir) = &self.working_directory {
            options = options.working_directory(dir);
        }
        options
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl LauncherConfig {
    /// Resolve the config file to read, if any.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Load, apply environment overrides and validate.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => Self::load_from_path(&path).await?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without overrides or validation.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Apply `BROOD_*` environment overrides.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn merge_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", level);
            self.general.log_level = level;
        }

        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            debug!("Overriding server environment from environment: {}", environment);
            self.server.environment = environment;
        }

        if let Some(secs) = lookup(ENV_CLOSE_TIMEOUT_SECS) {
            self.termination.close_timeout_secs = secs.trim().parse().map_err(|_| {
                Error::config(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_CLOSE_TIMEOUT_SECS, secs
                ))
            })?;
            debug!(
                "Overriding close timeout from environment: {}s",
                self.termination.close_timeout_secs
            );
        }

        if let Some(signal) = lookup(ENV_SIGNAL) {
            debug!("Overriding termination signal from environment: {}", signal);
            self.termination.signal = signal;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(Error::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.server.environment_variable.trim().is_empty() {
            return Err(Error::config("server.environment_variable must not be empty"));
        }

        if self.server.ready_marker.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config("server.ready_marker must not be empty when set"));
        }

        if self.server.ready_timeout_secs == 0 {
            return Err(Error::config("server.ready_timeout_secs must be greater than zero"));
        }

        self.supervisor().validate()
    }

    /// Library configuration for the supervisor.
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            termination: self.termination.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))
    }
}
