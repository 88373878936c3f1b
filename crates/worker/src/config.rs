use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconcile::ReconcileSettings;

/// One entry of the `SD_SERVICES` list: a Stable Diffusion backend the
/// pool may run a worker service against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Disabled entries are skipped by `ServicePool::init_services`.
    pub enabled: bool,
    /// Base URL of the backend, e.g. `http://127.0.0.1:7860`.
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model tag echoed in completion notices.
    #[serde(default)]
    pub model: Option<String>,
    /// Optional display name, used only in logs.
    #[serde(default)]
    pub name: Option<String>,
}

/// Errors raised while loading [`WorkerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub reconcile: ReconcileSettings,
    pub services: Vec<ServiceConfig>,
    /// Delay between claim attempts on an empty task queue.
    pub task_poll_interval: Duration,
    /// How long shutdown waits for each worker service to exit.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default            |
    /// |---------------------------|--------------------|
    /// | `DATABASE_URL`            | required           |
    /// | `RECONCILE_INTERVAL_SECS` | `5`                |
    /// | `JOB_TTL_SECS`            | `300`              |
    /// | `SD_MODEL_TAG`            | `stable-diffusion` |
    /// | `SD_SERVICES`             | `[]` (JSON array)  |
    /// | `TASK_POLL_INTERVAL_MS`   | `500`              |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `5`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let interval_secs: u64 = parse_or(&lookup, "RECONCILE_INTERVAL_SECS", 5)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "RECONCILE_INTERVAL_SECS",
                reason: "must be greater than zero".into(),
            });
        }
        let ttl_secs: u64 = parse_or(&lookup, "JOB_TTL_SECS", 300)?;
        let model_tag = lookup("SD_MODEL_TAG").unwrap_or_else(|| "stable-diffusion".into());
        let shutdown_secs: u64 = parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 5)?;
        let poll_ms: u64 = parse_or(&lookup, "TASK_POLL_INTERVAL_MS", 500)?;
        if poll_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "TASK_POLL_INTERVAL_MS",
                reason: "must be greater than zero".into(),
            });
        }

        let services = match lookup("SD_SERVICES") {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str::<Vec<ServiceConfig>>(&raw).map_err(|e| {
                    ConfigError::Invalid {
                        name: "SD_SERVICES",
                        reason: e.to_string(),
                    }
                })?
            }
            _ => Vec::new(),
        };

        Ok(Self {
            database_url,
            reconcile: ReconcileSettings {
                interval: Duration::from_secs(interval_secs),
                job_ttl: Duration::from_secs(ttl_secs),
                model_tag,
            },
            services,
            task_poll_interval: Duration::from_millis(poll_ms),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}
