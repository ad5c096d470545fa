//! YaoXiang worker configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Builder calls (WorkerBuilder::reloading, ...)
//! 2. Environment variables (YAOXIANG_RELOAD, YAOXIANG_MODULE_PATH)
//! 3. Config file (yaoxiang-worker.toml)
//! 4. Default values
//! ```
//!
//! # Example file
//!
//! ```toml
//! log_level = "debug"
//!
//! [worker]
//! reloading = true
//! periodic_failure = "halt"
//!
//! [modules]
//! paths = ["lib", "vendor"]
//! extension = "yx"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::runtime::scheduler::PeriodicFailurePolicy;
use crate::util::logger::LogLevel;

/// Environment variable overriding [`WorkerConfig::reloading`].
pub const ENV_RELOAD: &str = "YAOXIANG_RELOAD";

/// Environment variable overriding [`ModuleConfig::paths`] (platform path list).
pub const ENV_MODULE_PATH: &str = "YAOXIANG_MODULE_PATH";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Log level used by `util::logger`
    #[serde(default)]
    pub log_level: LogLevel,
    /// Worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Module search settings
    #[serde(default)]
    pub modules: ModuleConfig,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Recheck module staleness on every top-level call
    #[serde(default)]
    pub reloading: bool,
    /// Event loop thread name prefix; the worker id is appended
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// What a periodic task does after a failed firing
    #[serde(default)]
    pub periodic_failure: PeriodicFailurePolicy,
}

fn default_thread_name_prefix() -> String {
    "yaoxiang-worker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reloading: false,
            thread_name_prefix: default_thread_name_prefix(),
            periodic_failure: PeriodicFailurePolicy::default(),
        }
    }
}

/// Module search configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Module path, searched in order after the caller's own repository
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Script file extension, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "yx".to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            extension: default_extension(),
        }
    }
}

impl RuntimeConfig {
    /// Load a config file. Relative module paths are resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            for dir in &mut config.modules.paths {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseError)
    }

    /// Serialize to TOML text.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var_os(name))
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_vars<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(raw) = lookup(ENV_RELOAD) {
            let raw = raw.to_string_lossy();
            self.worker.reloading = parse_flag(&raw).ok_or_else(|| ConfigError::InvalidEnv {
                name: ENV_RELOAD,
                value: raw.to_string(),
            })?;
        }
        if let Some(raw) = lookup(ENV_MODULE_PATH) {
            self.modules.paths = std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
    SerializeError(toml::ser::Error),
    InvalidEnv { name: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
            ConfigError::SerializeError(e) => write!(f, "Config serialize error: {}", e),
            ConfigError::InvalidEnv { name, value } => {
                write!(f, "Invalid value for {}: {:?}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
