//! Engine configuration.
//!
//! The hosting process picks the execution mode and remote fan-out limits once
//! per process, usually from the environment. The configuration then yields the
//! dispatcher for each run and the default block init parameters.

use std::{env, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::warn;
use visionflow_registry::{API_KEY_PARAMETER, InitParameters, STEP_EXECUTION_MODE_PARAMETER, StepExecutionMode};

use crate::executor::{LocalDispatcher, RemoteDispatcher, StepDispatcher};

pub const STEP_EXECUTION_MODE_ENV: &str = "WORKFLOWS_STEP_EXECUTION_MODE";
pub const API_KEY_ENV: &str = "API_KEY";
pub const MAX_CONCURRENT_REQUESTS_ENV: &str = "WORKFLOWS_REMOTE_EXECUTION_MAX_STEP_CONCURRENT_REQUESTS";
pub const MAX_BATCH_SIZE_ENV: &str = "WORKFLOWS_REMOTE_EXECUTION_MAX_STEP_BATCH_SIZE";

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub step_execution_mode: StepExecutionMode,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub max_concurrent_requests: usize,
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_execution_mode: StepExecutionMode::Local,
            api_key: None,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from the environment.
    ///
    /// Unset variables take their defaults. Invalid values also fall back to the
    /// default and emit a warning rather than failing startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            step_execution_mode: env_value(STEP_EXECUTION_MODE_ENV).unwrap_or(defaults.step_execution_mode),
            api_key: env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()),
            max_concurrent_requests: env_limit(MAX_CONCURRENT_REQUESTS_ENV).unwrap_or(defaults.max_concurrent_requests),
            max_batch_size: env_limit(MAX_BATCH_SIZE_ENV).unwrap_or(defaults.max_batch_size),
        }
    }

    pub fn with_step_execution_mode(mut self, mode: StepExecutionMode) -> Self {
        self.step_execution_mode = mode;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Dispatcher matching the configured execution mode.
    pub fn dispatcher(&self) -> Arc<dyn StepDispatcher> {
        match self.step_execution_mode {
            StepExecutionMode::Local => Arc::new(LocalDispatcher),
            StepExecutionMode::Remote => Arc::new(RemoteDispatcher::new(self.max_concurrent_requests, self.max_batch_size)),
        }
    }

    /// Init parameters every block constructor may rely on.
    pub fn init_parameters(&self) -> InitParameters {
        InitParameters::new()
            .with(API_KEY_PARAMETER, self.api_key.clone())
            .with(STEP_EXECUTION_MODE_PARAMETER, self.step_execution_mode)
    }
}

fn env_value<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(variable = name, value = %raw, %error, "ignoring invalid configuration value");
            None
        }
    }
}

/// Positive integer limit; zero is treated as invalid.
fn env_limit(name: &str) -> Option<usize> {
    let limit: usize = env_value(name)?;
    if limit == 0 {
        warn!(variable = name, "ignoring zero limit; at least 1 is required");
        return None;
    }
    Some(limit)
}
