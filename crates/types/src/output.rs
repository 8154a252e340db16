//! Values produced by executed steps.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// An output value tagged with the concrete kind it was produced as.
///
/// Outputs whose descriptor lists a single kind are tagged by the engine. Blocks
/// producing union outputs tag the value themselves so consumers can check it
/// against the kinds they accept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KindedValue {
    #[serde(default)]
    pub kind: Option<String>,
    pub value: Value,
}

impl KindedValue {
    pub fn untagged(value: Value) -> Self {
        Self { kind: None, value }
    }

    pub fn tagged(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: Some(kind.into()),
            value,
        }
    }
}

/// One record produced by a single block invocation, keyed by output name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub fields: IndexMap<String, KindedValue>,
}

impl StepRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an untagged field.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), KindedValue::untagged(value));
        self
    }

    /// Adds a field tagged with the concrete kind it carries.
    pub fn with_kind(mut self, name: impl Into<String>, kind: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), KindedValue::tagged(kind, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&KindedValue> {
        self.fields.get(name)
    }

    /// Plain JSON view of the record without kind tags.
    pub fn to_json(&self) -> Value {
        let map: JsonMap<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect();
        Value::Object(map)
    }
}

/// A step's recorded result: one record, or one record per batch element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "arity", content = "records", rename_all = "snake_case")]
pub enum StepOutput {
    Single(StepRecord),
    Batch(Vec<StepRecord>),
}

impl StepOutput {
    pub fn is_batch(&self) -> bool {
        matches!(self, StepOutput::Batch(_))
    }

    pub fn records(&self) -> Vec<&StepRecord> {
        match self {
            StepOutput::Single(record) => vec![record],
            StepOutput::Batch(records) => records.iter().collect(),
        }
    }

    /// Plain JSON view: an object for single records, an array of objects for batches.
    pub fn to_json(&self) -> Value {
        match self {
            StepOutput::Single(record) => record.to_json(),
            StepOutput::Batch(records) => Value::Array(records.iter().map(StepRecord::to_json).collect()),
        }
    }
}

/// Signal returned alongside a step result to steer the rest of the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// Downstream steps run normally.
    #[default]
    Continue,
    /// Every step depending on the signalling step is skipped for the rest of the run.
    TerminateBranch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_view_drops_kind_tags() {
        let record = StepRecord::new()
            .with("parent_id", json!("image"))
            .with_kind("predictions", "object_detection_prediction", json!([]));
        assert_eq!(record.to_json(), json!({"parent_id": "image", "predictions": []}));
    }

    #[test]
    fn batch_json_view_is_ordered_array() {
        let output = StepOutput::Batch(vec![StepRecord::new().with("i", json!(0)), StepRecord::new().with("i", json!(1))]);
        assert_eq!(output.to_json(), json!([{"i": 0}, {"i": 1}]));
        assert!(output.is_batch());
        assert_eq!(output.records().len(), 2);
    }
}
