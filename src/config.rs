//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::Timeouts;
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;
use crate::strategy::CreationSettings;

/// Orchestrator settings derived from defaults, `flotilla.toml`, `FLOTILLA_*`
/// environment variables and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLOTILLA",
    discovery(
        app_name = "flotilla",
        env_var = "FLOTILLA_CONFIG_PATH",
        config_file_name = "flotilla.toml",
        dotfile_name = ".flotilla.toml",
        project_file_name = "flotilla.toml"
    )
)]
pub struct ComputeConfig {
    /// Per-node tasks allowed to run at once across every operation.
    #[ortho_config(default = 10)]
    pub pool_size: usize,
    /// Per-node tasks allowed to wait for a worker.
    #[ortho_config(default = 256)]
    pub queue_capacity: usize,
    /// Milliseconds a submission waits for queue space before it is rejected.
    #[ortho_config(default = 5_000)]
    pub queue_wait_ms: u64,
    /// Milliseconds between state polls.
    #[ortho_config(default = 1_000)]
    pub poll_interval_ms: u64,
    /// Milliseconds a new or resumed node may take to reach RUNNING.
    #[ortho_config(default = 1_200_000)]
    pub node_running_timeout_ms: u64,
    /// Milliseconds a destroyed node may take to reach TERMINATED.
    #[ortho_config(default = 30_000)]
    pub node_terminated_timeout_ms: u64,
    /// Milliseconds a suspended node may take to reach SUSPENDED.
    #[ortho_config(default = 30_000)]
    pub node_suspended_timeout_ms: u64,
    /// Milliseconds spent retrying deletion of group resources after the
    /// last node of a group is destroyed.
    #[ortho_config(default = 3_000)]
    pub cleanup_timeout_ms: u64,
    /// Prefix of auto-created key pair and security group names.
    #[ortho_config(default = "flotilla".to_owned())]
    pub resource_prefix: String,
    /// Allocate and associate a public address for every new node.
    #[ortho_config(default = false)]
    pub auto_allocate_addresses: bool,
    /// Location applied to templates that do not constrain one.
    pub default_location: Option<String>,
    /// JSON file holding node credentials. In-memory storage is used when
    /// unset.
    pub credential_store_path: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn invalid(&self, problem: &str) -> ConfigError {
        ConfigError::InvalidField(format!(
            "{} {problem}: set {} or add {} to flotilla.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl ComputeConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that sizes and durations are usable. Error messages name the
    /// environment variable and TOML key that control the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for the first unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(FieldMetadata::new("task pool size", "FLOTILLA_POOL_SIZE", "pool_size")
                .invalid("must be at least 1"));
        }
        let durations = [
            (
                self.poll_interval_ms,
                FieldMetadata::new("poll interval", "FLOTILLA_POLL_INTERVAL_MS", "poll_interval_ms"),
            ),
            (
                self.node_running_timeout_ms,
                FieldMetadata::new(
                    "node running timeout",
                    "FLOTILLA_NODE_RUNNING_TIMEOUT_MS",
                    "node_running_timeout_ms",
                ),
            ),
            (
                self.node_terminated_timeout_ms,
                FieldMetadata::new(
                    "node terminated timeout",
                    "FLOTILLA_NODE_TERMINATED_TIMEOUT_MS",
                    "node_terminated_timeout_ms",
                ),
            ),
            (
                self.node_suspended_timeout_ms,
                FieldMetadata::new(
                    "node suspended timeout",
                    "FLOTILLA_NODE_SUSPENDED_TIMEOUT_MS",
                    "node_suspended_timeout_ms",
                ),
            ),
        ];
        for (value, metadata) in &durations {
            if *value == 0 {
                return Err(metadata.invalid("must be greater than zero"));
            }
        }
        if self.resource_prefix.trim().is_empty() || self.resource_prefix.contains('#') {
            return Err(FieldMetadata::new(
                "resource prefix",
                "FLOTILLA_RESOURCE_PREFIX",
                "resource_prefix",
            )
            .invalid("must be non-empty and must not contain '#'"));
        }
        if self
            .credential_store_path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(FieldMetadata::new(
                "credential store path",
                "FLOTILLA_CREDENTIAL_STORE_PATH",
                "credential_store_path",
            )
            .invalid("must not be empty when set"));
        }
        Ok(())
    }

    /// Task pool sizing.
    #[must_use]
    pub const fn pool(&self) -> PoolConfig {
        PoolConfig {
            workers: self.pool_size,
            queue_capacity: self.queue_capacity,
            queue_wait: Duration::from_millis(self.queue_wait_ms),
        }
    }

    /// State transition budgets.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            node_running: Duration::from_millis(self.node_running_timeout_ms),
            node_terminated: Duration::from_millis(self.node_terminated_timeout_ms),
            node_suspended: Duration::from_millis(self.node_suspended_timeout_ms),
            cleanup: Duration::from_millis(self.cleanup_timeout_ms),
        }
    }

    /// Creation strategy settings.
    #[must_use]
    pub fn creation(&self) -> CreationSettings {
        let timeouts = self.timeouts();
        CreationSettings {
            resource_prefix: self.resource_prefix.clone(),
            auto_allocate_addresses: self.auto_allocate_addresses,
            running: RetryPolicy::new(timeouts.poll_interval, timeouts.node_running),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
