use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::review::DEFAULT_REVIEW_CAP;
use crate::orchestration::RetryPolicy;
use crate::{sflog_debug, Error, Result};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_CONVERGENCE_CAP: u32 = 10;
pub const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_ESCALATION_ROUNDS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: cfg.max_attempts,
            backoff_base_ms: cfg.backoff_base_ms,
            backoff_max_ms: cfg.backoff_max_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capability binary. Extra words are passed as leading arguments.
    pub command: Option<String>,
    pub model: Option<String>,
    pub max_concurrency: usize,
    pub review_cap: u32,
    pub convergence_cap: u32,
    pub capability_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Ask a human before accepting a task at the review cap with minor issues.
    pub acknowledge_auto_accept: bool,
    pub max_escalation_rounds: u32,
    pub output_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            model: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            review_cap: DEFAULT_REVIEW_CAP,
            convergence_cap: DEFAULT_CONVERGENCE_CAP,
            capability_timeout_secs: DEFAULT_CAPABILITY_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            acknowledge_auto_accept: false,
            max_escalation_rounds: DEFAULT_MAX_ESCALATION_ROUNDS,
            output_dir: None,
        }
    }
}

impl Config {
    pub fn specflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".specflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::specflow_dir()?.join("specflow.toml"))
    }

    /// Where run journals and reports are written.
    pub fn effective_output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::specflow_dir()?.join("runs")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn capability_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.capability_timeout_secs)
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        sflog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            sflog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        sflog_debug!(
            "Config loaded: command={:?}, model={:?}, max_concurrency={}, review_cap={}",
            config.command,
            config.model,
            config.max_concurrency,
            config.review_cap
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                sflog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        sflog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that would stall or skip a stage.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| -> Result<()> {
            Err(Error::Validation(format!("{} must be at least 1", name)))
        };
        if self.max_concurrency == 0 {
            return zero("max_concurrency");
        }
        if self.review_cap == 0 {
            return zero("review_cap");
        }
        if self.convergence_cap == 0 {
            return zero("convergence_cap");
        }
        if self.retry.max_attempts == 0 {
            return zero("retry.max_attempts");
        }
        if self.capability_timeout_secs == 0 {
            return zero("capability_timeout_secs");
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(Error::Validation(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
