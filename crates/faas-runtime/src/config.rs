//! Runtime configuration read from the function's environment.

use faas_executor::php_fpm::DEFAULT_CONFIG_PATH;
use faas_executor::ProcessConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";
pub const TASK_ROOT_VAR: &str = "LAMBDA_TASK_ROOT";
pub const HANDLER_VAR: &str = "_HANDLER";

const FPM_CONFIG_VAR: &str = "FAAS_FPM_CONFIG";
const FPM_START_TIMEOUT_VAR: &str = "FAAS_FPM_START_TIMEOUT_MS";
const FPM_STOP_TIMEOUT_VAR: &str = "FAAS_FPM_STOP_TIMEOUT_MS";
const FASTCGI_TIMEOUT_VAR: &str = "FAAS_FASTCGI_TIMEOUT_MS";
const CONSOLE_TIMEOUT_VAR: &str = "FAAS_CONSOLE_TIMEOUT_MS";

const DEFAULT_FASTCGI_TIMEOUT: Duration = Duration::from_secs(900);
const DEFAULT_CONSOLE_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {name}: expected a number of milliseconds")]
    InvalidDuration { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `host:port` of the control-plane API.
    pub runtime_api: String,
    /// Application root directory.
    pub task_root: PathBuf,
    /// Configured handler, used as the script name by the bare-script layout.
    pub handler: String,
    pub process: ProcessConfig,
    /// Upper bound on a single FastCGI exchange.
    pub fastcgi_timeout: Duration,
    pub console_timeout: Duration,
}

impl RuntimeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let millis = |name: &'static str, default: Duration| match lookup(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidDuration { name, value }),
        };

        let fpm_config = lookup(FPM_CONFIG_VAR).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut process = ProcessConfig::for_config_file(fpm_config);
        process.start_timeout = millis(FPM_START_TIMEOUT_VAR, process.start_timeout)?;
        process.stop_timeout = millis(FPM_STOP_TIMEOUT_VAR, process.stop_timeout)?;

        Ok(Self {
            runtime_api: required(RUNTIME_API_VAR)?,
            task_root: PathBuf::from(required(TASK_ROOT_VAR)?),
            handler: lookup(HANDLER_VAR).unwrap_or_default(),
            process,
            fastcgi_timeout: millis(FASTCGI_TIMEOUT_VAR, DEFAULT_FASTCGI_TIMEOUT)?,
            console_timeout: millis(CONSOLE_TIMEOUT_VAR, DEFAULT_CONSOLE_TIMEOUT)?,
        })
    }
}
