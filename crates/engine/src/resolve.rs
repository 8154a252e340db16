//! Per-run execution context and selector resolution.
//!
//! An [`ExecutionContext`] is owned by exactly one run. It holds the caller's
//! runtime parameters, the append-only table of step outputs, and the set of
//! steps skipped by flow control. Resolution is a pure lookup against it.

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use visionflow_registry::{ResolvedValue, kinds_compatible};
use visionflow_types::{PropertyValue, Selector, StepOutput};

use crate::error::ExecutionError;

/// A caller-supplied runtime value: one element, or an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Single(Value),
    Batch(Vec<Value>),
}

impl From<ParameterValue> for ResolvedValue {
    fn from(value: ParameterValue) -> Self {
        match value {
            ParameterValue::Single(value) => ResolvedValue::Single(value),
            ParameterValue::Batch(values) => ResolvedValue::Batch(values),
        }
    }
}

/// Runtime inputs keyed by input name. Read-only once a run starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeParameters {
    values: IndexMap<String, ParameterValue>,
}

impl RuntimeParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, ParameterValue::Single(value));
        self
    }

    /// Binds an input to a batch; consuming steps fan out over it.
    pub fn with_batch(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.insert(name, ParameterValue::Batch(values));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// Step outputs recorded so far in a run, keyed by step name.
///
/// Entries are written once and never replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputsLookup {
    entries: IndexMap<String, StepOutput>,
}

impl OutputsLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step: &str, output: StepOutput) -> Result<()> {
        if self.entries.contains_key(step) {
            bail!("outputs of step '{step}' were already recorded in this run");
        }
        self.entries.insert(step.to_string(), output);
        Ok(())
    }

    pub fn get(&self, step: &str) -> Option<&StepOutput> {
        self.entries.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.entries.contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one run reads and writes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub runtime_parameters: RuntimeParameters,
    pub outputs: OutputsLookup,
    pub skipped: BTreeSet<String>,
}

impl ExecutionContext {
    pub fn new(runtime_parameters: RuntimeParameters) -> Self {
        Self {
            runtime_parameters,
            outputs: OutputsLookup::new(),
            skipped: BTreeSet::new(),
        }
    }

    pub fn is_skipped(&self, step: &str) -> bool {
        self.skipped.contains(step)
    }

    pub fn skip(&mut self, step: impl Into<String>) {
        self.skipped.insert(step.into());
    }
}

/// Resolves a property value without checking output kinds.
pub fn resolve(value: &PropertyValue, context: &ExecutionContext) -> Result<ResolvedValue, ExecutionError> {
    resolve_value(value, None, context)
}

/// Resolves a property value, rejecting step outputs whose concrete kind is not
/// compatible with `accepted_kinds`. Untagged values are not checked.
pub fn resolve_accepting(value: &PropertyValue, accepted_kinds: &[String], context: &ExecutionContext) -> Result<ResolvedValue, ExecutionError> {
    resolve_value(value, Some(accepted_kinds), context)
}

fn resolve_value(value: &PropertyValue, accepted_kinds: Option<&[String]>, context: &ExecutionContext) -> Result<ResolvedValue, ExecutionError> {
    match value {
        PropertyValue::Literal(literal) => Ok(ResolvedValue::Single(literal.clone())),
        PropertyValue::Selector(Selector::Input { name }) => context
            .runtime_parameters
            .get(name)
            .cloned()
            .map(ResolvedValue::from)
            .ok_or_else(|| ExecutionError::UnresolvedInput { input: name.clone() }),
        PropertyValue::Selector(Selector::Step { step }) => {
            if context.outputs.contains(step) {
                Ok(ResolvedValue::Single(Value::String(step.clone())))
            } else {
                Err(ExecutionError::StepNotYetExecuted { step: step.clone() })
            }
        }
        PropertyValue::Selector(Selector::StepOutput { step, output }) => {
            let recorded = context
                .outputs
                .get(step)
                .ok_or_else(|| ExecutionError::StepNotYetExecuted { step: step.clone() })?;
            let mut values = Vec::new();
            for record in recorded.records() {
                let field = record.get(output).ok_or_else(|| ExecutionError::UnknownOutputField {
                    step: step.clone(),
                    output: output.clone(),
                })?;
                if let (Some(accepted), Some(kind)) = (accepted_kinds, field.kind.as_deref())
                    && !accepted.is_empty()
                    && !kinds_compatible(&[kind], accepted)
                {
                    return Err(ExecutionError::OutputKindMismatch {
                        step: step.clone(),
                        output: output.clone(),
                        kind: kind.to_string(),
                        accepted: accepted.to_vec(),
                    });
                }
                values.push(field.value.clone());
            }
            Ok(match recorded {
                StepOutput::Single(_) => ResolvedValue::Single(values.pop().unwrap_or(Value::Null)),
                StepOutput::Batch(_) => ResolvedValue::Batch(values),
            })
        }
    }
}
