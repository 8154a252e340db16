//! Built-in `ContinueIf` flow-control block.
//!
//! Compares a value (or its length) against a comparand and terminates the
//! branch when the comparison does not hold. Steps that must only run on the
//! surviving branch select the `ContinueIf` step as a whole (`$steps.<name>`).
//!
//! The engine evaluates the block once over the whole resolved value: a batched
//! value is compared as one array, so `length` counts batch elements.
//!
//! ```yaml
//! - type: ContinueIf
//!   name: has_detections
//!   value: $steps.detect.predictions
//!   measure: length
//!   operator: ">"
//!   comparand: 0
//! ```

use std::{cmp::Ordering, fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use visionflow_registry::{BlockDescriptor, BlockInputs, BlockResult, ResolvedValue, WorkflowBlock};
use visionflow_types::{FieldSchema, FlowControl, ManifestSchema, ReferenceDefinition, StepRecord, WILDCARD_KIND};

/// Discriminator of the built-in block.
pub const CONTINUE_IF_BLOCK_TYPE: &str = "ContinueIf";

/// Comparison applied by `ContinueIf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    In,
}

impl FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        Ok(match raw.trim() {
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterOrEqual,
            "<" => Operator::Less,
            "<=" => Operator::LessOrEqual,
            "in" => Operator::In,
            other => bail!("unsupported operator '{other}'; expected one of ==, !=, >, >=, <, <=, in"),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::In => "in",
        })
    }
}

/// What is compared: the value itself or its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Value,
    Length,
}

impl FromStr for Measure {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "value" => Ok(Measure::Value),
            "length" => Ok(Measure::Length),
            other => bail!("unsupported measure '{other}'; expected 'value' or 'length'"),
        }
    }
}

/// Evaluates `left <operator> right`.
pub fn evaluate(left: &Value, operator: Operator, right: &Value) -> Result<bool> {
    match operator {
        Operator::Equal => Ok(values_equal(left, right)),
        Operator::NotEqual => Ok(!values_equal(left, right)),
        Operator::Greater => Ok(compare(left, right)? == Ordering::Greater),
        Operator::GreaterOrEqual => Ok(compare(left, right)? != Ordering::Less),
        Operator::Less => Ok(compare(left, right)? == Ordering::Less),
        Operator::LessOrEqual => Ok(compare(left, right)? != Ordering::Greater),
        Operator::In => match right {
            Value::Array(items) => Ok(items.iter().any(|item| values_equal(left, item))),
            Value::Object(map) => left
                .as_str()
                .map(|key| map.contains_key(key))
                .ok_or_else(|| anyhow!("'in' on an object needs a string key, got {left}")),
            Value::String(haystack) => left
                .as_str()
                .map(|needle| haystack.contains(needle))
                .ok_or_else(|| anyhow!("'in' on a string needs a string operand, got {left}")),
            other => bail!("'in' needs an array, object or string on the right, got {other}"),
        },
    }
}

/// Numbers compare by value so `1` equals `1.0`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (left_number, right_number) = (left.as_f64().unwrap_or(f64::NAN), right.as_f64().unwrap_or(f64::NAN));
            left_number
                .partial_cmp(&right_number)
                .ok_or_else(|| anyhow!("cannot order {left} and {right}"))
        }
        (Value::String(left), Value::String(right)) => Ok(left.cmp(right)),
        _ => bail!("cannot order {left} and {right}"),
    }
}

fn measure(value: &Value, measure: Measure) -> Result<Value> {
    if measure == Measure::Value {
        return Ok(value.clone());
    }
    let length = match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(text) => text.chars().count(),
        Value::Null => 0,
        other => bail!("cannot take the length of {other}"),
    };
    Ok(Value::from(length))
}

fn whole_value(inputs: &BlockInputs, property_name: &str) -> Result<Value> {
    inputs
        .get(property_name)
        .map(ResolvedValue::to_json)
        .ok_or_else(|| anyhow!("step '{}' is missing input '{property_name}'", inputs.step_name()))
}

struct ContinueIf;

#[async_trait]
impl WorkflowBlock for ContinueIf {
    async fn run_locally(&self, inputs: BlockInputs) -> Result<BlockResult> {
        let operator: Operator = inputs
            .require("operator")?
            .as_str()
            .ok_or_else(|| anyhow!("'operator' must be a string"))?
            .parse()?;
        let measure_kind: Measure = match inputs.value("measure") {
            Some(Value::String(raw)) => raw.parse()?,
            Some(other) => bail!("'measure' must be a string, got {other}"),
            None => Measure::Value,
        };
        let left = measure(&whole_value(&inputs, "value")?, measure_kind)?;
        let right = whole_value(&inputs, "comparand")?;

        let holds = evaluate(&left, operator, &right)?;
        debug!(step = %inputs.step_name(), %operator, holds, "evaluated continue condition");

        let result = BlockResult::single(StepRecord::new());
        Ok(if holds {
            result
        } else {
            result.with_flow_control(FlowControl::TerminateBranch)
        })
    }
}

/// Registration entry for `ContinueIf`. It produces no outputs.
pub fn continue_if_descriptor() -> BlockDescriptor {
    let any_source = || {
        vec![
            ReferenceDefinition::input([WILDCARD_KIND]),
            ReferenceDefinition::step_output([WILDCARD_KIND]),
        ]
    };
    let schema = ManifestSchema::new()
        .with_description("Terminates the branch unless the condition holds")
        .with_field(
            "value",
            FieldSchema {
                references: any_source(),
                ..FieldSchema::literal("Any")
            }
            .required(),
        )
        .with_field("operator", FieldSchema::literal("str").required())
        .with_field(
            "comparand",
            FieldSchema {
                references: any_source(),
                ..FieldSchema::literal("Any")
            }
            .required(),
        )
        .with_field(
            "measure",
            FieldSchema::literal("str")
                .with_description("'value' or 'length'")
                .with_default(json!("value")),
        );
    BlockDescriptor::stateless(CONTINUE_IF_BLOCK_TYPE, schema, ContinueIf).running_in_engine()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(value: Value, operator: &str, comparand: Value, measure: Option<&str>) -> BlockInputs {
        let mut inputs = BlockInputs::new("check")
            .with("value", ResolvedValue::Single(value))
            .with("operator", ResolvedValue::Single(json!(operator)))
            .with("comparand", ResolvedValue::Single(comparand));
        if let Some(measure) = measure {
            inputs.insert("measure", ResolvedValue::Single(json!(measure)));
        }
        inputs
    }

    #[test]
    fn operators_compare_numbers_strings_and_membership() {
        assert!(evaluate(&json!(1), Operator::Equal, &json!(1.0)).expect("eq"));
        assert!(evaluate(&json!("b"), Operator::Greater, &json!("a")).expect("gt"));
        assert!(evaluate(&json!(2), Operator::LessOrEqual, &json!(2)).expect("le"));
        assert!(evaluate(&json!("dog"), Operator::In, &json!(["cat", "dog"])).expect("in"));
        assert!(!evaluate(&json!("dog"), Operator::NotEqual, &json!("dog")).expect("ne"));
        assert!(evaluate(&json!(1), Operator::Greater, &json!("a")).is_err());
        assert!(">>".parse::<Operator>().is_err());
    }

    #[tokio::test]
    async fn false_condition_terminates_branch() {
        let block = ContinueIf;
        let empty = block
            .run_locally(inputs(json!([]), ">", json!(0), Some("length")))
            .await
            .expect("run");
        assert_eq!(empty.flow_control, FlowControl::TerminateBranch);

        let found = block
            .run_locally(inputs(json!([{"class": "dog"}]), ">", json!(0), Some("length")))
            .await
            .expect("run");
        assert_eq!(found.flow_control, FlowControl::Continue);
        assert_eq!(found.output.to_json(), json!({}));
    }

    #[tokio::test]
    async fn batched_values_are_measured_as_a_whole() {
        let inputs = BlockInputs::new("check")
            .with("value", ResolvedValue::Batch(vec![json!([]), json!([{"class": "dog"}])]))
            .with("operator", ResolvedValue::Single(json!(">")))
            .with("comparand", ResolvedValue::Single(json!(2)))
            .with("measure", ResolvedValue::Single(json!("length")));
        let result = ContinueIf.run_locally(inputs).await.expect("run");
        assert_eq!(result.flow_control, FlowControl::TerminateBranch);
        assert_eq!(result.output.to_json(), json!({}));
    }

    #[tokio::test]
    async fn measure_defaults_to_value() {
        let result = ContinueIf
            .run_locally(inputs(json!("ok"), "==", json!("ok"), None))
            .await
            .expect("run");
        assert_eq!(result.flow_control, FlowControl::Continue);
    }

    #[test]
    fn descriptor_registers_cleanly() {
        let descriptor = continue_if_descriptor();
        assert!(descriptor.outputs.is_empty());
        assert!(descriptor.runs_in_engine);
        assert_eq!(descriptor.schema.fields["measure"].default, Some(json!("value")));
    }
}
