//! Block initialization parameters.
//!
//! Blocks are constructed from a fixed, named set of values supplied by the
//! hosting process (never by the workflow document). Each block type declares the
//! names it needs; construction fails when one is missing.

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// API key forwarded to model backends.
pub const API_KEY_PARAMETER: &str = "api_key";
/// Shared cache handle.
pub const CACHE_PARAMETER: &str = "cache";
/// The [`StepExecutionMode`] selected for the run.
pub const STEP_EXECUTION_MODE_PARAMETER: &str = "step_execution_mode";

/// Where backend calls are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionMode {
    #[default]
    Local,
    Remote,
}

impl StepExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepExecutionMode::Local => "local",
            StepExecutionMode::Remote => "remote",
        }
    }
}

impl fmt::Display for StepExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepExecutionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StepExecutionMode::Local),
            "remote" => Ok(StepExecutionMode::Remote),
            other => Err(format!("unknown step execution mode '{other}'; expected 'local' or 'remote'")),
        }
    }
}

/// Named, type-erased values blocks may request at construction time.
#[derive(Clone, Default)]
pub struct InitParameters {
    values: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl InitParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.insert(name, value);
        self
    }

    pub fn insert<T>(&mut self, name: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(name.into(), Arc::new(value));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Typed view of a parameter; `None` when absent or of a different type.
    pub fn get<T>(&self, name: &str) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.values.get(name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.get::<Option<String>>(API_KEY_PARAMETER)
            .and_then(|key| key.as_deref())
            .or_else(|| self.get::<String>(API_KEY_PARAMETER).map(String::as_str))
    }

    pub fn step_execution_mode(&self) -> Option<StepExecutionMode> {
        self.get::<StepExecutionMode>(STEP_EXECUTION_MODE_PARAMETER).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for InitParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitParameters").field("names", &self.values.keys().collect::<Vec<_>>()).finish()
    }
}
