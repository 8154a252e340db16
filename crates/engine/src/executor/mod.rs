//! Workflow execution engine.
//!
//! Walks a [`CompiledWorkflow`] in its compiled order. For each step the engine
//! resolves the step's properties, fans out over batched inputs when the block
//! only takes single elements, dispatches through the run's [`StepDispatcher`],
//! tags the produced records with their kinds, and records them. Flow-control
//! blocks are evaluated in-process over the whole resolved input instead. A step
//! that signals [`FlowControl::TerminateBranch`] skips every step downstream of
//! it for the rest of the run. The first error aborts the run and no further
//! invocations are dispatched.

mod dispatch;
mod types;

use std::{collections::HashMap, sync::Arc};

use anyhow::{Result as AnyResult, anyhow, bail};
use futures_util::{StreamExt, TryStreamExt, stream};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};
use visionflow_registry::{BlockInputs, BlockRegistry, BlockResult, InitParameters, ResolvedValue, WorkflowBlock};
use visionflow_types::{FlowControl, PropertyValue, Selector, StepOutput, StepRecord, is_wildcard_kind};

pub use dispatch::{LocalDispatcher, RemoteDispatcher, StepDispatcher};
pub use types::{StepReport, StepStatus, WorkflowRunResult};

use crate::{
    compiler::{CompiledStep, CompiledWorkflow},
    error::ExecutionError,
    resolve::{ExecutionContext, ParameterValue, RuntimeParameters, resolve, resolve_accepting},
};

/// Runs compiled workflows against a registry with one dispatcher.
pub struct ExecutionEngine<'r> {
    registry: &'r BlockRegistry,
    dispatcher: Arc<dyn StepDispatcher>,
    init_parameters: InitParameters,
}

struct StepOutcome {
    output: StepOutput,
    flow_control: FlowControl,
    invocations: usize,
}

/// One planned block call and, for batch-accepting blocks, the batch length it covers.
struct Invocation {
    inputs: BlockInputs,
    batch_len: Option<usize>,
}

impl<'r> ExecutionEngine<'r> {
    pub fn new(registry: &'r BlockRegistry, dispatcher: Arc<dyn StepDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            init_parameters: InitParameters::new(),
        }
    }

    /// Parameters handed to block constructors.
    pub fn with_init_parameters(mut self, init_parameters: InitParameters) -> Self {
        self.init_parameters = init_parameters;
        self
    }

    pub fn dispatcher(&self) -> &dyn StepDispatcher {
        self.dispatcher.as_ref()
    }

    /// Executes every step of `workflow` in order and projects the declared outputs.
    pub async fn execute(&self, workflow: &CompiledWorkflow, runtime_parameters: RuntimeParameters) -> Result<WorkflowRunResult, ExecutionError> {
        let mut context = ExecutionContext::new(apply_input_defaults(workflow, runtime_parameters));
        let mut instances: HashMap<&str, Arc<dyn WorkflowBlock>> = HashMap::new();
        let mut reports = Vec::with_capacity(workflow.steps().len());

        info!(steps = workflow.steps().len(), mode = %self.dispatcher.mode(), "starting workflow run");

        for step in workflow.steps() {
            if context.is_skipped(&step.name) || step.dependencies.iter().any(|dependency| context.is_skipped(dependency)) {
                context.skip(step.name.clone());
                info!(step = %step.name, block_type = %step.block_type, "skipping step on terminated branch");
                reports.push(StepReport {
                    name: step.name.clone(),
                    block_type: step.block_type.clone(),
                    status: StepStatus::Skipped,
                    invocations: 0,
                    flow_control: FlowControl::Continue,
                });
                continue;
            }

            let block = match instances.get(step.block_type.as_str()) {
                Some(block) => Arc::clone(block),
                None => {
                    let block = self
                        .registry
                        .instantiate(&step.block_type, &self.init_parameters)
                        .map_err(|source| ExecutionError::Initialization {
                            step: step.name.clone(),
                            source,
                        })?;
                    instances.insert(step.block_type.as_str(), Arc::clone(&block));
                    block
                }
            };

            let inputs = resolve_step_inputs(step, &context)?;
            let outcome = self.run_step(step, block.as_ref(), inputs).await?;
            let output = tag_output_kinds(step, outcome.output).map_err(|source| ExecutionError::step_failed(&step.name, source))?;
            context
                .outputs
                .insert(&step.name, output)
                .map_err(|source| ExecutionError::step_failed(&step.name, source))?;

            if outcome.flow_control == FlowControl::TerminateBranch {
                let dependents = workflow.transitive_dependents(&step.name);
                info!(step = %step.name, skipped = dependents.len(), "step terminated its branch");
                for dependent in dependents {
                    context.skip(dependent);
                }
            }

            reports.push(StepReport {
                name: step.name.clone(),
                block_type: step.block_type.clone(),
                status: StepStatus::Succeeded,
                invocations: outcome.invocations,
                flow_control: outcome.flow_control,
            });
        }

        let outputs = project_outputs(workflow, &context)?;
        let result = WorkflowRunResult { outputs, steps: reports };
        info!(
            succeeded = result.steps.len() - result.skipped_steps().count(),
            skipped = result.skipped_steps().count(),
            "workflow run finished"
        );
        Ok(result)
    }

    async fn run_step(&self, step: &CompiledStep, block: &dyn WorkflowBlock, inputs: IndexMap<String, ResolvedValue>) -> Result<StepOutcome, ExecutionError> {
        if step.runs_in_engine {
            debug!(step = %step.name, block_type = %step.block_type, "evaluating step in engine");
            let result = block
                .run_locally(into_block_inputs(&step.name, inputs))
                .await
                .map_err(|source| ExecutionError::step_failed(&step.name, source))?;
            return Ok(StepOutcome {
                output: result.output,
                flow_control: result.flow_control,
                invocations: 1,
            });
        }

        let batch_len = batch_length(&inputs).map_err(|source| ExecutionError::step_failed(&step.name, source))?;

        let Some(batch_len) = batch_len else {
            debug!(step = %step.name, block_type = %step.block_type, mode = %self.dispatcher.mode(), invocations = 1, "dispatching step");
            let result = self
                .dispatcher
                .dispatch(block, into_block_inputs(&step.name, inputs))
                .await
                .map_err(|source| ExecutionError::step_failed(&step.name, source))?;
            return Ok(StepOutcome {
                output: result.output,
                flow_control: result.flow_control,
                invocations: 1,
            });
        };

        let invocations = plan_invocations(step, &inputs, batch_len, self.dispatcher.max_batch_size());
        let invocation_count = invocations.len();
        debug!(
            step = %step.name,
            block_type = %step.block_type,
            mode = %self.dispatcher.mode(),
            batch_len,
            invocations = invocation_count,
            "dispatching batched step"
        );

        let dispatcher = self.dispatcher.as_ref();
        let expected_lengths: Vec<Option<usize>> = invocations.iter().map(|invocation| invocation.batch_len).collect();
        let results: Vec<BlockResult> = stream::iter(invocations)
            .map(|invocation| dispatcher.dispatch(block, invocation.inputs))
            .buffered(dispatcher.max_concurrency().max(1))
            .try_collect()
            .await
            .map_err(|source| ExecutionError::step_failed(&step.name, source))?;

        let mut records: Vec<StepRecord> = Vec::with_capacity(batch_len);
        let mut terminated = 0;
        for (result, expected) in results.into_iter().zip(expected_lengths) {
            if result.flow_control == FlowControl::TerminateBranch {
                terminated += 1;
            }
            collect_records(&mut records, result.output, expected).map_err(|source| ExecutionError::step_failed(&step.name, source))?;
        }

        // A fanned-out block ends the branch only when every invocation ends it.
        let flow_control = if invocation_count > 0 && terminated == invocation_count {
            FlowControl::TerminateBranch
        } else {
            FlowControl::Continue
        };
        Ok(StepOutcome {
            output: StepOutput::Batch(records),
            flow_control,
            invocations: invocation_count,
        })
    }
}

fn apply_input_defaults(workflow: &CompiledWorkflow, mut parameters: RuntimeParameters) -> RuntimeParameters {
    for input in workflow.inputs() {
        if parameters.contains(&input.name) {
            continue;
        }
        if let Some(default) = &input.default_value {
            debug!(input = %input.name, "using declared default for runtime input");
            parameters.insert(input.name.clone(), ParameterValue::Single(default.clone()));
        }
    }
    parameters
}

fn resolve_step_inputs(step: &CompiledStep, context: &ExecutionContext) -> Result<IndexMap<String, ResolvedValue>, ExecutionError> {
    let mut inputs = IndexMap::with_capacity(step.properties.len());
    for (name, property) in &step.properties {
        inputs.insert(name.clone(), resolve_accepting(&property.value, &property.accepted_kinds, context)?);
    }
    Ok(inputs)
}

/// Common length of all batched inputs; `None` when nothing is batched.
fn batch_length(inputs: &IndexMap<String, ResolvedValue>) -> AnyResult<Option<usize>> {
    let lengths: Vec<(&str, usize)> = inputs
        .iter()
        .filter_map(|(name, value)| value.batch_len().map(|len| (name.as_str(), len)))
        .collect();
    let Some(&(_, first)) = lengths.first() else {
        return Ok(None);
    };
    if lengths.iter().any(|&(_, len)| len != first) {
        let details: Vec<String> = lengths.iter().map(|(name, len)| format!("{name}={len}")).collect();
        bail!("batched inputs have mismatched lengths ({})", details.join(", "));
    }
    Ok(Some(first))
}

fn into_block_inputs(step_name: &str, inputs: IndexMap<String, ResolvedValue>) -> BlockInputs {
    inputs
        .into_iter()
        .fold(BlockInputs::new(step_name), |block_inputs, (name, value)| block_inputs.with(name, value))
}

/// Splits batched inputs into per-element calls, or per-chunk calls for batch-accepting blocks.
fn plan_invocations(
    step: &CompiledStep,
    inputs: &IndexMap<String, ResolvedValue>,
    batch_len: usize,
    max_batch_size: Option<usize>,
) -> Vec<Invocation> {
    if step.accepts_batch_input {
        let chunk_size = max_batch_size.unwrap_or(batch_len).max(1);
        (0..batch_len)
            .step_by(chunk_size)
            .map(|start| {
                let end = (start + chunk_size).min(batch_len);
                Invocation {
                    inputs: slice_inputs(&step.name, inputs, |values| ResolvedValue::Batch(values[start..end].to_vec())),
                    batch_len: Some(end - start),
                }
            })
            .collect()
    } else {
        (0..batch_len)
            .map(|index| Invocation {
                inputs: slice_inputs(&step.name, inputs, |values| ResolvedValue::Single(values[index].clone())),
                batch_len: None,
            })
            .collect()
    }
}

fn slice_inputs(step_name: &str, inputs: &IndexMap<String, ResolvedValue>, pick: impl Fn(&[Value]) -> ResolvedValue) -> BlockInputs {
    let mut block_inputs = BlockInputs::new(step_name);
    for (name, value) in inputs {
        let value = match value {
            ResolvedValue::Single(value) => ResolvedValue::Single(value.clone()),
            ResolvedValue::Batch(values) => pick(values),
        };
        block_inputs.insert(name.clone(), value);
    }
    block_inputs
}

fn collect_records(records: &mut Vec<StepRecord>, output: StepOutput, expected: Option<usize>) -> AnyResult<()> {
    match (expected, output) {
        (None, StepOutput::Single(record)) => records.push(record),
        (None, StepOutput::Batch(batch)) => bail!("block returned {} records for a single batch element", batch.len()),
        (Some(len), StepOutput::Batch(batch)) if batch.len() == len => records.extend(batch),
        (Some(len), output) => bail!("block returned {} records for a batch of {len}", output.records().len()),
    }
    Ok(())
}

/// Tags untagged fields with their declared kind and rejects undeclared or mistagged fields.
fn tag_output_kinds(step: &CompiledStep, output: StepOutput) -> AnyResult<StepOutput> {
    let tag = |mut record: StepRecord| -> AnyResult<StepRecord> {
        for (name, field) in record.fields.iter_mut() {
            let descriptor = step
                .output(name)
                .ok_or_else(|| anyhow!("block '{}' produced undeclared output '{name}'", step.block_type))?;
            match field.kind.clone() {
                None => match descriptor.kinds.as_slice() {
                    [only] => field.kind = Some(only.clone()),
                    kinds => bail!("output '{name}' may carry any of {kinds:?}; the block must tag the concrete kind"),
                },
                Some(kind) => {
                    let declared = descriptor
                        .kinds
                        .iter()
                        .any(|declared| declared == &kind || is_wildcard_kind(declared));
                    if !declared {
                        bail!("output '{name}' was tagged '{kind}' which is not among its declared kinds {:?}", descriptor.kinds);
                    }
                }
            }
        }
        Ok(record)
    };

    Ok(match output {
        StepOutput::Single(record) => StepOutput::Single(tag(record)?),
        StepOutput::Batch(records) => StepOutput::Batch(records.into_iter().map(tag).collect::<AnyResult<_>>()?),
    })
}

fn project_outputs(workflow: &CompiledWorkflow, context: &ExecutionContext) -> Result<IndexMap<String, Value>, ExecutionError> {
    let mut outputs = IndexMap::with_capacity(workflow.outputs().len());
    for output in workflow.outputs() {
        let skipped = output.selector.step_name().is_some_and(|step| context.is_skipped(step));
        let value = match &output.selector {
            _ if skipped => Value::Null,
            Selector::Step { step } => context
                .outputs
                .get(step)
                .map(StepOutput::to_json)
                .ok_or_else(|| ExecutionError::StepNotYetExecuted { step: step.clone() })?,
            selector => resolve(&PropertyValue::Selector(selector.clone()), context)?.to_json(),
        };
        outputs.insert(output.name.clone(), value);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_workflow;
    use crate::testing::{fixture_registry, step};
    use serde_json::json;
    use visionflow_types::{WorkflowDefinition, WorkflowInput, WorkflowOutputDefinition};

    fn detect_workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            version: None,
            inputs: vec![WorkflowInput::Name("image".into())],
            steps: vec![step("Detect", "detect").with_property("image", json!("$inputs.image"))],
            outputs: vec![
                WorkflowOutputDefinition::new("predictions", "$steps.detect.predictions"),
                WorkflowOutputDefinition::new("record", "$steps.detect"),
            ],
        }
    }

    #[tokio::test]
    async fn runs_single_step_and_projects_outputs() {
        let registry = fixture_registry();
        let compiled = compile_workflow(&detect_workflow(), &registry).expect("compile");
        let engine = ExecutionEngine::new(&registry, Arc::new(LocalDispatcher));

        let result = engine
            .execute(&compiled, RuntimeParameters::new().with("image", json!("cat.jpg")))
            .await
            .expect("run");

        assert_eq!(result.output("predictions"), Some(&json!([{"source": "cat.jpg", "confidence": 0.5}])));
        assert_eq!(
            result.output("record"),
            Some(&json!({"predictions": [{"source": "cat.jpg", "confidence": 0.5}]}))
        );
        assert_eq!(result.step("detect").map(|report| report.invocations), Some(1));
    }

    #[tokio::test]
    async fn batches_fan_out_in_input_order() {
        let registry = fixture_registry();
        let compiled = compile_workflow(&detect_workflow(), &registry).expect("compile");
        let engine = ExecutionEngine::new(&registry, Arc::new(RemoteDispatcher::new(3, 1)));
        let images = vec![json!("a"), json!("b"), json!("c"), json!("d")];

        let result = engine
            .execute(&compiled, RuntimeParameters::new().with_batch("image", images))
            .await
            .expect("run");

        let sources: Vec<Value> = result.output("predictions").and_then(Value::as_array).expect("batch").clone();
        assert_eq!(
            sources.iter().map(|predictions| predictions[0]["source"].clone()).collect::<Vec<_>>(),
            vec![json!("a"), json!("b"), json!("c"), json!("d")]
        );
        assert_eq!(result.step("detect").map(|report| report.invocations), Some(4));
    }

    #[tokio::test]
    async fn missing_runtime_input_aborts_the_run() {
        let registry = fixture_registry();
        let compiled = compile_workflow(&detect_workflow(), &registry).expect("compile");
        let engine = ExecutionEngine::new(&registry, Arc::new(LocalDispatcher));
        let error = engine.execute(&compiled, RuntimeParameters::new()).await.expect_err("missing input");
        assert!(matches!(error, ExecutionError::UnresolvedInput { input } if input == "image"));
    }

    #[test]
    fn mismatched_batch_lengths_are_rejected() {
        let inputs: IndexMap<String, ResolvedValue> = IndexMap::from([
            ("image".to_string(), ResolvedValue::Batch(vec![json!(1), json!(2)])),
            ("mask".to_string(), ResolvedValue::Batch(vec![json!(1)])),
            ("threshold".to_string(), ResolvedValue::Single(json!(0.5))),
        ]);
        let error = batch_length(&inputs).expect_err("mismatch");
        assert!(error.to_string().contains("image=2, mask=1"), "{error}");
    }

    #[test]
    fn batch_accepting_blocks_are_chunked_by_max_batch_size() {
        let registry = fixture_registry();
        let mut compiled_step = compile_workflow(&detect_workflow(), &registry).expect("compile").steps()[0].clone();
        compiled_step.accepts_batch_input = true;
        let inputs: IndexMap<String, ResolvedValue> = IndexMap::from([
            ("image".to_string(), ResolvedValue::Batch((0..5).map(|index| json!(index)).collect())),
            ("confidence".to_string(), ResolvedValue::Single(json!(0.5))),
        ]);

        let chunks: Vec<Option<usize>> = plan_invocations(&compiled_step, &inputs, 5, Some(2))
            .into_iter()
            .map(|invocation| invocation.batch_len)
            .collect();
        assert_eq!(chunks, vec![Some(2), Some(2), Some(1)]);
        assert_eq!(plan_invocations(&compiled_step, &inputs, 5, None).len(), 1);
    }

    #[test]
    fn output_tagging_uses_declared_kinds() {
        let registry = fixture_registry();
        let compiled = compile_workflow(&detect_workflow(), &registry).expect("compile");
        let detect = &compiled.steps()[0];

        let tagged = tag_output_kinds(detect, StepOutput::Single(StepRecord::new().with("predictions", json!([])))).expect("tag");
        let StepOutput::Single(record) = tagged else {
            panic!("expected single output");
        };
        assert_eq!(record.get("predictions").and_then(|field| field.kind.as_deref()), Some("object_detection_prediction"));

        let undeclared = tag_output_kinds(detect, StepOutput::Single(StepRecord::new().with("masks", json!([]))));
        assert!(undeclared.is_err());
        let mistagged = tag_output_kinds(detect, StepOutput::Single(StepRecord::new().with_kind("predictions", "image", json!([]))));
        assert!(mistagged.is_err());
    }
}
