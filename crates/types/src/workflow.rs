//! Declarative workflow documents.
//!
//! A workflow names its runtime inputs, lists its steps (each a block manifest
//! selected by the `type` discriminator), and declares which step outputs form the
//! result. Documents parsed from text keep their authoring order, which the
//! compiler uses to break scheduling ties.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::WILDCARD_KIND;

/// A complete workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct WorkflowDefinition {
    /// Optional document format version.
    #[serde(default)]
    pub version: Option<String>,
    /// Runtime inputs the caller must (or may) supply.
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    /// Step manifests in authoring order.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Declared workflow outputs.
    #[serde(default)]
    pub outputs: Vec<WorkflowOutputDefinition>,
}

/// A runtime input declaration: either a bare name or a detailed object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum WorkflowInput {
    /// Bare input name; the input is of the wildcard kind and has no default.
    Name(String),
    Detailed(WorkflowInputDefinition),
}

impl WorkflowInput {
    pub fn name(&self) -> &str {
        match self {
            WorkflowInput::Name(name) => name,
            WorkflowInput::Detailed(definition) => &definition.name,
        }
    }

    /// Declared kinds, defaulting to the wildcard kind.
    pub fn kinds(&self) -> Vec<String> {
        match self {
            WorkflowInput::Detailed(definition) if !definition.kind.is_empty() => definition.kind.clone(),
            _ => vec![WILDCARD_KIND.to_string()],
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        match self {
            WorkflowInput::Name(_) => None,
            WorkflowInput::Detailed(definition) => definition.default_value.as_ref(),
        }
    }
}

/// Detailed runtime input declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct WorkflowInputDefinition {
    pub name: String,
    /// Kinds the input value may carry. Empty means the wildcard kind.
    #[serde(default)]
    pub kind: Vec<String>,
    /// Value used when the caller omits the input.
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// One step manifest. The `type` tag selects the block whose schema applies to
/// the remaining properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StepDefinition {
    /// Block type discriminator.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Unique step name within the workflow.
    pub name: String,
    /// Remaining properties: literals or selector strings.
    #[serde(flatten)]
    pub properties: IndexMap<String, Value>,
}

impl StepDefinition {
    pub fn new(block_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            name: name.into(),
            properties: IndexMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A declared workflow output bound to a step selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct WorkflowOutputDefinition {
    pub name: String,
    pub selector: String,
}

impl WorkflowOutputDefinition {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
        }
    }
}

/// JSON Schema describing the workflow document format.
pub fn workflow_definition_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(WorkflowDefinition)).unwrap_or(Value::Null)
}
