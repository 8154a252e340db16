//! Block run contract.
//!
//! A block is the runtime half of a block type: given resolved inputs it produces
//! a step result, optionally with a flow-control signal. Blocks are opaque to the
//! engine; they may run a local model, call a remote inference service, or do
//! neither (flow-control and transformation blocks).

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use visionflow_types::{FlowControl, StepOutput, StepRecord};

/// A resolved property value: one element, or an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Single(Value),
    Batch(Vec<Value>),
}

impl ResolvedValue {
    pub fn is_batch(&self) -> bool {
        matches!(self, ResolvedValue::Batch(_))
    }

    pub fn batch_len(&self) -> Option<usize> {
        match self {
            ResolvedValue::Single(_) => None,
            ResolvedValue::Batch(values) => Some(values.len()),
        }
    }

    /// Plain JSON view; batches become arrays.
    pub fn to_json(&self) -> Value {
        match self {
            ResolvedValue::Single(value) => value.clone(),
            ResolvedValue::Batch(values) => Value::Array(values.clone()),
        }
    }
}

/// Inputs handed to one block invocation, keyed by property name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockInputs {
    step_name: String,
    values: IndexMap<String, ResolvedValue>,
}

impl BlockInputs {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn with(mut self, property_name: impl Into<String>, value: ResolvedValue) -> Self {
        self.insert(property_name, value);
        self
    }

    pub fn insert(&mut self, property_name: impl Into<String>, value: ResolvedValue) {
        self.values.insert(property_name.into(), value);
    }

    /// Name of the step being executed.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn get(&self, property_name: &str) -> Option<&ResolvedValue> {
        self.values.get(property_name)
    }

    /// Single-element value of a property; `None` when absent or batched.
    pub fn value(&self, property_name: &str) -> Option<&Value> {
        match self.values.get(property_name) {
            Some(ResolvedValue::Single(value)) => Some(value),
            _ => None,
        }
    }

    /// Like [`BlockInputs::value`] but errors when the property is absent or batched.
    pub fn require(&self, property_name: &str) -> Result<&Value> {
        self.value(property_name)
            .ok_or_else(|| anyhow!("step '{}' is missing single-valued input '{}'", self.step_name, property_name))
    }

    /// Batch view of a property. Single values are presented as a one-element batch.
    pub fn batch(&self, property_name: &str) -> Option<Vec<&Value>> {
        match self.values.get(property_name)? {
            ResolvedValue::Single(value) => Some(vec![value]),
            ResolvedValue::Batch(values) => Some(values.iter().collect()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedValue)> {
        self.values.iter()
    }
}

/// What a block invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockResult {
    pub output: StepOutput,
    pub flow_control: FlowControl,
}

impl BlockResult {
    pub fn single(record: StepRecord) -> Self {
        Self {
            output: StepOutput::Single(record),
            flow_control: FlowControl::Continue,
        }
    }

    pub fn batch(records: Vec<StepRecord>) -> Self {
        Self {
            output: StepOutput::Batch(records),
            flow_control: FlowControl::Continue,
        }
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Runtime contract implemented by every block type.
///
/// Exactly one of the two methods is used for a given run, chosen by the
/// dispatcher the engine was handed.
#[async_trait]
pub trait WorkflowBlock: Send + Sync {
    /// Serve the invocation in-process.
    async fn run_locally(&self, inputs: BlockInputs) -> Result<BlockResult>;

    /// Serve the invocation through a remote inference service.
    ///
    /// Blocks without a remote backend run locally.
    async fn run_remotely(&self, inputs: BlockInputs) -> Result<BlockResult> {
        self.run_locally(inputs).await
    }
}
