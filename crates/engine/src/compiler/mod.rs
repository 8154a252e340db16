//! Workflow compiler.
//!
//! Turns a [`WorkflowDefinition`] into a [`CompiledWorkflow`]: every step is
//! matched to its registered block, every property is parsed into a literal or a
//! selector and checked against the block's manifest, every selector is
//! type-checked against what it references, and the steps are placed in a
//! deterministic topological order. Nothing is executed here; any error aborts
//! compilation without producing a partial plan.

mod ordering;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use visionflow_registry::{BlockRegistry, BlocksConnections, RegisteredBlock, SelectorField, kinds_compatible};
use visionflow_types::{OutputDescriptor, PropertyValue, Selector, StepDefinition, WorkflowDefinition};

use crate::error::CompileError;

/// A declared runtime input after validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledInput {
    pub name: String,
    pub kinds: Vec<String>,
    pub default_value: Option<Value>,
}

/// One step property after parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledProperty {
    pub value: PropertyValue,
    /// Kinds the consuming field accepts for the selector's element; empty for literals.
    pub accepted_kinds: Vec<String>,
}

/// A step bound to its block, with parsed properties and resolved dependencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStep {
    pub name: String,
    pub block_type: String,
    /// Position in the source definition.
    pub declaration_index: usize,
    pub properties: IndexMap<String, CompiledProperty>,
    pub outputs: Vec<OutputDescriptor>,
    pub accepts_batch_input: bool,
    /// Evaluated once by the engine over the whole resolved input.
    pub runs_in_engine: bool,
    /// Names of steps this step selects, either as a whole or through an output.
    pub dependencies: BTreeSet<String>,
}

impl CompiledStep {
    pub fn selectors(&self) -> impl Iterator<Item = (&str, &Selector)> {
        self.properties
            .iter()
            .filter_map(|(name, property)| property.value.as_selector().map(|selector| (name.as_str(), selector)))
    }

    pub fn output(&self, name: &str) -> Option<&OutputDescriptor> {
        self.outputs.iter().find(|output| output.name == name)
    }
}

/// A declared workflow output bound to a parsed step selector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledOutput {
    pub name: String,
    pub selector: Selector,
}

/// Executable plan: steps in execution order plus the dependency index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledWorkflow {
    steps: Vec<CompiledStep>,
    inputs: Vec<CompiledInput>,
    outputs: Vec<CompiledOutput>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl CompiledWorkflow {
    /// Steps in execution order.
    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&CompiledStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn inputs(&self) -> &[CompiledInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[CompiledOutput] {
        &self.outputs
    }

    pub fn execution_order(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    /// Steps that select `step` directly.
    pub fn dependents_of(&self, step: &str) -> impl Iterator<Item = &str> {
        self.dependents.get(step).into_iter().flatten().map(String::as_str)
    }

    /// Every step reachable from `step` through dependency edges, excluding `step`.
    pub fn transitive_dependents(&self, step: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut pending: Vec<&str> = self.dependents_of(step).collect();
        while let Some(current) = pending.pop() {
            if reached.insert(current.to_string()) {
                pending.extend(self.dependents_of(current));
            }
        }
        reached
    }
}

/// Compiles a workflow definition against the registered block types.
pub fn compile_workflow(definition: &WorkflowDefinition, registry: &BlockRegistry) -> Result<CompiledWorkflow, CompileError> {
    debug!(steps = definition.steps.len(), inputs = definition.inputs.len(), "compiling workflow");

    let inputs = compile_inputs(definition, registry)?;
    let blocks = bind_blocks(definition, registry)?;
    let scope = CompileScope {
        inputs: &inputs,
        blocks: &blocks,
        connections: registry.connections(),
    };

    let mut compiled = Vec::with_capacity(definition.steps.len());
    for (index, step) in definition.steps.iter().enumerate() {
        compiled.push(scope.compile_step(index, step)?);
    }
    let outputs = compile_outputs(definition, &blocks)?;

    let names: Vec<&str> = compiled.iter().map(|step| step.name.as_str()).collect();
    let dependency_indices: Vec<BTreeSet<usize>> = compiled
        .iter()
        .map(|step| step.dependencies.iter().map(|dependency| blocks[dependency.as_str()].0).collect())
        .collect();
    let order = ordering::order_steps(&names, &dependency_indices)?;

    let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for step in &compiled {
        for dependency in &step.dependencies {
            dependents.entry(dependency.clone()).or_default().insert(step.name.clone());
        }
    }

    let mut slots: Vec<Option<CompiledStep>> = compiled.into_iter().map(Some).collect();
    let steps: Vec<CompiledStep> = order.into_iter().filter_map(|index| slots[index].take()).collect();

    info!(
        steps = steps.len(),
        outputs = outputs.len(),
        order = ?steps.iter().map(|step| step.name.as_str()).collect::<Vec<_>>(),
        "compiled workflow"
    );
    Ok(CompiledWorkflow {
        steps,
        inputs,
        outputs,
        dependents,
    })
}

fn compile_inputs(definition: &WorkflowDefinition, registry: &BlockRegistry) -> Result<Vec<CompiledInput>, CompileError> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::with_capacity(definition.inputs.len());
    for input in &definition.inputs {
        let name = input.name();
        if !seen.insert(name) {
            return Err(CompileError::DuplicateInputName { input: name.to_string() });
        }
        let kinds = input.kinds();
        if let Some(kind) = kinds.iter().find(|kind| !registry.kinds().contains(kind)) {
            return Err(CompileError::UnknownInputKind {
                input: name.to_string(),
                kind: kind.clone(),
            });
        }
        inputs.push(CompiledInput {
            name: name.to_string(),
            kinds,
            default_value: input.default_value().cloned(),
        });
    }
    Ok(inputs)
}

/// Step name -> (declaration index, registered block).
type BoundBlocks<'r> = HashMap<&'r str, (usize, &'r RegisteredBlock)>;

fn bind_blocks<'r>(definition: &'r WorkflowDefinition, registry: &'r BlockRegistry) -> Result<BoundBlocks<'r>, CompileError> {
    let mut blocks = HashMap::with_capacity(definition.steps.len());
    for (index, step) in definition.steps.iter().enumerate() {
        let block = registry.get(&step.block_type).map_err(|_| CompileError::UnknownBlockType {
            step: step.name.clone(),
            block_type: step.block_type.clone(),
        })?;
        if blocks.insert(step.name.as_str(), (index, block)).is_some() {
            return Err(CompileError::DuplicateStepName { step: step.name.clone() });
        }
    }
    Ok(blocks)
}

struct CompileScope<'a, 'r> {
    inputs: &'a [CompiledInput],
    blocks: &'a BoundBlocks<'r>,
    connections: &'a BlocksConnections,
}

impl CompileScope<'_, '_> {
    fn compile_step(&self, index: usize, step: &StepDefinition) -> Result<CompiledStep, CompileError> {
        let (_, block) = self.blocks[step.name.as_str()];
        let manifest = &block.manifest;
        let mut properties = IndexMap::new();
        let mut dependencies = BTreeSet::new();

        for (property_name, raw) in &step.properties {
            if !manifest.declares(property_name) {
                return Err(invalid_manifest(step, property_name, format!("block '{}' declares no such property", step.block_type)));
            }
            let selector_field = manifest.selector_fields.get(property_name);
            let selector_text = raw.as_str().filter(|text| Selector::looks_like_selector(text));

            let property = match (selector_field, selector_text) {
                (Some(field), Some(text)) => {
                    let selector = match Selector::parse(text) {
                        Ok(selector) => selector,
                        // Fields that also take literals keep unparseable `$` strings as text.
                        Err(_) if manifest.primitive_fields.contains_key(property_name) => {
                            properties.insert(property_name.clone(), literal(raw.clone()));
                            continue;
                        }
                        Err(source) => {
                            return Err(CompileError::MalformedSelector {
                                step: step.name.clone(),
                                field: property_name.clone(),
                                source,
                            });
                        }
                    };
                    let accepted_kinds = self.check_reference(step, field, &selector)?;
                    if let Some(dependency) = selector.step_name() {
                        dependencies.insert(dependency.to_string());
                    }
                    CompiledProperty {
                        value: PropertyValue::Selector(selector),
                        accepted_kinds,
                    }
                }
                _ if manifest.primitive_fields.contains_key(property_name) => literal(raw.clone()),
                _ => {
                    return Err(invalid_manifest(step, property_name, format!("expects a selector, got literal {raw}")));
                }
            };
            properties.insert(property_name.clone(), property);
        }

        for property_name in manifest.property_names() {
            if properties.contains_key(property_name) {
                continue;
            }
            let (required, default) = match manifest.primitive_fields.get(property_name) {
                Some(field) => (field.required, field.default.clone()),
                None => {
                    let field = &manifest.selector_fields[property_name];
                    (field.required, field.default.clone())
                }
            };
            match default {
                Some(default) => {
                    properties.insert(property_name.to_string(), literal(default));
                }
                None if required => {
                    return Err(invalid_manifest(step, property_name, "required property is missing".to_string()));
                }
                None => {}
            }
        }

        debug!(step = %step.name, block_type = %step.block_type, dependencies = dependencies.len(), "compiled step");
        Ok(CompiledStep {
            name: step.name.clone(),
            block_type: step.block_type.clone(),
            declaration_index: index,
            properties,
            outputs: block.descriptor.outputs.clone(),
            accepts_batch_input: block.descriptor.accepts_batch_input,
            runs_in_engine: block.descriptor.runs_in_engine,
            dependencies,
        })
    }

    /// Validates what a selector points at and returns the kinds the field accepts for it.
    fn check_reference(&self, step: &StepDefinition, field: &SelectorField, selector: &Selector) -> Result<Vec<String>, CompileError> {
        let element = selector.selected_element();
        let invalid = |reason: String| CompileError::InvalidReference {
            step: step.name.clone(),
            field: field.property_name.clone(),
            selector: selector.to_string(),
            reason,
        };
        if !field.accepts_element(element) {
            return Err(invalid(format!("is not accepted here; the field takes {}", accepted_forms(field))));
        }
        let expected = field.kinds_for(element);
        let mismatch = |actual: Vec<String>| CompileError::TypeMismatch {
            step: step.name.clone(),
            field: field.property_name.clone(),
            selector: selector.to_string(),
            expected: expected.clone(),
            actual,
        };

        match selector {
            Selector::Input { name } => {
                let input = self
                    .inputs
                    .iter()
                    .find(|input| &input.name == name)
                    .ok_or_else(|| invalid(format!("references undeclared input '{name}'")))?;
                if !kinds_compatible(input.kinds.as_slice(), expected.as_slice()) {
                    return Err(mismatch(input.kinds.clone()));
                }
            }
            Selector::Step { step: referenced } => {
                if !self.blocks.contains_key(referenced.as_str()) {
                    return Err(invalid(format!("references unknown step '{referenced}'")));
                }
            }
            Selector::StepOutput { step: referenced, output } => {
                let (_, producer) = self
                    .blocks
                    .get(referenced.as_str())
                    .ok_or_else(|| invalid(format!("references unknown step '{referenced}'")))?;
                let descriptor = producer
                    .descriptor
                    .output(output)
                    .ok_or_else(|| invalid(format!("step '{referenced}' ({}) has no output '{output}'", producer.block_type())))?;
                let connectable = self
                    .connections
                    .can_feed_property(producer.block_type(), &step.block_type, &field.property_name);
                if !connectable || !kinds_compatible(descriptor.kinds.as_slice(), expected.as_slice()) {
                    return Err(mismatch(descriptor.kinds.clone()));
                }
            }
        }
        Ok(expected)
    }
}

fn compile_outputs(definition: &WorkflowDefinition, blocks: &BoundBlocks<'_>) -> Result<Vec<CompiledOutput>, CompileError> {
    let mut seen = HashSet::new();
    let mut outputs = Vec::with_capacity(definition.outputs.len());
    for output in &definition.outputs {
        if !seen.insert(output.name.as_str()) {
            return Err(CompileError::DuplicateOutputName { output: output.name.clone() });
        }
        let unknown = |reason: String| CompileError::UnknownOutputReference {
            output: output.name.clone(),
            selector: output.selector.clone(),
            reason,
        };
        let selector = Selector::parse(&output.selector).map_err(|error| unknown(error.to_string()))?;
        match &selector {
            Selector::Input { .. } => return Err(unknown("workflow outputs must select a step or a step output".to_string())),
            Selector::Step { step } => {
                if !blocks.contains_key(step.as_str()) {
                    return Err(unknown(format!("no step named '{step}'")));
                }
            }
            Selector::StepOutput { step, output: field } => {
                let (_, block) = blocks.get(step.as_str()).ok_or_else(|| unknown(format!("no step named '{step}'")))?;
                if block.descriptor.output(field).is_none() {
                    return Err(unknown(format!("step '{step}' ({}) has no output '{field}'", block.block_type())));
                }
            }
        }
        outputs.push(CompiledOutput {
            name: output.name.clone(),
            selector,
        });
    }
    Ok(outputs)
}

fn literal(value: Value) -> CompiledProperty {
    CompiledProperty {
        value: PropertyValue::Literal(value),
        accepted_kinds: Vec::new(),
    }
}

fn invalid_manifest(step: &StepDefinition, field: &str, reason: String) -> CompileError {
    CompileError::InvalidStepManifest {
        step: step.name.clone(),
        field: field.to_string(),
        reason,
    }
}

fn accepted_forms(field: &SelectorField) -> String {
    let forms: Vec<&str> = [
        (field.accepts_input, "$inputs.<name>"),
        (field.accepts_step_output, "$steps.<step>.<output>"),
        (field.accepts_step_reference, "$steps.<step>"),
    ]
    .into_iter()
    .filter_map(|(accepted, form)| accepted.then_some(form))
    .collect();
    forms.join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_registry, step};
    use serde_json::json;
    use visionflow_types::{WorkflowInput, WorkflowInputDefinition, WorkflowOutputDefinition};

    fn definition(inputs: &[&str], steps: Vec<StepDefinition>, outputs: &[(&str, &str)]) -> WorkflowDefinition {
        WorkflowDefinition {
            version: None,
            inputs: inputs.iter().map(|name| WorkflowInput::Name(name.to_string())).collect(),
            steps,
            outputs: outputs
                .iter()
                .map(|(name, selector)| WorkflowOutputDefinition::new(*name, *selector))
                .collect(),
        }
    }

    #[test]
    fn orders_by_dependencies_then_declaration() {
        let workflow = definition(
            &["image"],
            vec![
                step("Classify", "classify").with_property("image", json!("$steps.crop.crops")),
                step("Detect", "detect").with_property("image", json!("$inputs.image")),
                step("Crop", "crop")
                    .with_property("image", json!("$inputs.image"))
                    .with_property("predictions", json!("$steps.detect.predictions")),
            ],
            &[("labels", "$steps.classify.predictions")],
        );
        let compiled = compile_workflow(&workflow, &fixture_registry()).expect("compile");
        assert_eq!(compiled.execution_order(), vec!["detect", "crop", "classify"]);
        assert_eq!(compiled.transitive_dependents("detect"), BTreeSet::from(["crop".to_string(), "classify".to_string()]));
        assert_eq!(compiled.step("classify").expect("step").declaration_index, 0);
    }

    #[test]
    fn compilation_is_deterministic() {
        let workflow = definition(
            &["image"],
            vec![
                step("Detect", "b").with_property("image", json!("$inputs.image")),
                step("Detect", "a").with_property("image", json!("$inputs.image")),
                step("Detect", "c").with_property("image", json!("$inputs.image")),
            ],
            &[],
        );
        let registry = fixture_registry();
        let first = compile_workflow(&workflow, &registry).expect("compile");
        for _ in 0..5 {
            assert_eq!(compile_workflow(&workflow, &registry).expect("compile"), first);
        }
        assert_eq!(first.execution_order(), vec!["b", "a", "c"]);
    }

    #[test]
    fn rejects_unknown_block_types_and_duplicate_names() {
        let registry = fixture_registry();
        let unknown = definition(&[], vec![step("Teleport", "t")], &[]);
        assert!(matches!(
            compile_workflow(&unknown, &registry),
            Err(CompileError::UnknownBlockType { block_type, .. }) if block_type == "Teleport"
        ));

        let duplicate = definition(
            &["image"],
            vec![
                step("Detect", "d").with_property("image", json!("$inputs.image")),
                step("Detect", "d").with_property("image", json!("$inputs.image")),
            ],
            &[],
        );
        assert!(matches!(
            compile_workflow(&duplicate, &registry),
            Err(CompileError::DuplicateStepName { step }) if step == "d"
        ));
    }

    #[test]
    fn validates_step_properties_against_manifest() {
        let registry = fixture_registry();

        let missing = definition(&[], vec![step("Detect", "d")], &[]);
        let error = compile_workflow(&missing, &registry).expect_err("missing");
        assert!(matches!(&error, CompileError::InvalidStepManifest { field, .. } if field == "image"), "{error}");

        let unknown = definition(
            &["image"],
            vec![
                step("Detect", "d")
                    .with_property("image", json!("$inputs.image"))
                    .with_property("colour", json!("red")),
            ],
            &[],
        );
        assert!(matches!(
            compile_workflow(&unknown, &registry),
            Err(CompileError::InvalidStepManifest { field, .. }) if field == "colour"
        ));

        let literal_for_selector = definition(&[], vec![step("Detect", "d").with_property("image", json!("raw-bytes"))], &[]);
        assert!(matches!(
            compile_workflow(&literal_for_selector, &registry),
            Err(CompileError::InvalidStepManifest { field, .. }) if field == "image"
        ));

        let malformed = definition(&[], vec![step("Detect", "d").with_property("image", json!("$inputs"))], &[]);
        assert!(matches!(
            compile_workflow(&malformed, &registry),
            Err(CompileError::MalformedSelector { field, .. }) if field == "image"
        ));
    }

    #[test]
    fn dollar_literals_stay_literal_where_literals_are_allowed() {
        let workflow = definition(
            &["image"],
            vec![
                step("Detect", "d")
                    .with_property("image", json!("$inputs.image"))
                    .with_property("confidence", json!("$5")),
            ],
            &[],
        );
        let compiled = compile_workflow(&workflow, &fixture_registry()).expect("compile");
        let step = compiled.step("d").expect("step");
        assert_eq!(step.properties["confidence"].value, PropertyValue::Literal(json!("$5")));
        assert!(step.dependencies.is_empty());
    }

    #[test]
    fn fills_schema_defaults() {
        let workflow = definition(&["image"], vec![step("Detect", "d").with_property("image", json!("$inputs.image"))], &[]);
        let compiled = compile_workflow(&workflow, &fixture_registry()).expect("compile");
        let confidence = &compiled.step("d").expect("step").properties["confidence"];
        assert_eq!(confidence.value, PropertyValue::Literal(json!(0.5)));
    }

    #[test]
    fn type_mismatch_names_step_and_field() {
        let workflow = definition(
            &["image"],
            vec![
                step("Detect", "detect").with_property("image", json!("$inputs.image")),
                step("Classify", "classify").with_property("image", json!("$steps.detect.predictions")),
            ],
            &[],
        );
        match compile_workflow(&workflow, &fixture_registry()).expect_err("mismatch") {
            CompileError::TypeMismatch { step, field, .. } => {
                assert_eq!(step, "classify");
                assert_eq!(field, "image");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn typed_inputs_are_checked() {
        let mut workflow = definition(&[], vec![step("Detect", "d").with_property("image", json!("$inputs.label"))], &[]);
        workflow.inputs.push(WorkflowInput::Detailed(WorkflowInputDefinition {
            name: "label".into(),
            kind: vec!["string".into()],
            default_value: None,
        }));
        assert!(matches!(
            compile_workflow(&workflow, &fixture_registry()),
            Err(CompileError::TypeMismatch { actual, .. }) if actual == vec!["string".to_string()]
        ));
    }

    #[test]
    fn references_must_exist_and_be_accepted() {
        let registry = fixture_registry();
        let undeclared = definition(&[], vec![step("Detect", "d").with_property("image", json!("$inputs.image"))], &[]);
        assert!(matches!(
            compile_workflow(&undeclared, &registry),
            Err(CompileError::InvalidReference { reason, .. }) if reason.contains("undeclared input")
        ));

        let whole_step_where_output_expected = definition(
            &["image"],
            vec![
                step("Detect", "detect").with_property("image", json!("$inputs.image")),
                step("Classify", "classify").with_property("image", json!("$steps.detect")),
            ],
            &[],
        );
        assert!(matches!(
            compile_workflow(&whole_step_where_output_expected, &registry),
            Err(CompileError::InvalidReference { step, .. }) if step == "classify"
        ));
    }

    #[test]
    fn cycles_never_produce_a_plan() {
        let workflow = definition(
            &["image"],
            vec![
                step("Crop", "first")
                    .with_property("image", json!("$steps.second.crops"))
                    .with_property("predictions", json!("$steps.detect.predictions")),
                step("Crop", "second")
                    .with_property("image", json!("$steps.first.crops"))
                    .with_property("predictions", json!("$steps.detect.predictions")),
                step("Detect", "detect").with_property("image", json!("$inputs.image")),
            ],
            &[],
        );
        match compile_workflow(&workflow, &fixture_registry()).expect_err("cycle") {
            CompileError::CyclicDependency { step } => assert!(step == "first" || step == "second", "{step}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn outputs_must_reference_existing_step_fields() {
        let registry = fixture_registry();
        let steps = || vec![step("Detect", "detect").with_property("image", json!("$inputs.image"))];

        for selector in ["$steps.detect.masks", "$steps.ghost.predictions", "$inputs.image", "steps.detect"] {
            let workflow = definition(&["image"], steps(), &[("result", selector)]);
            assert!(
                matches!(compile_workflow(&workflow, &registry), Err(CompileError::UnknownOutputReference { .. })),
                "{selector}"
            );
        }

        let whole_step = definition(&["image"], steps(), &[("everything", "$steps.detect")]);
        let compiled = compile_workflow(&whole_step, &registry).expect("compile");
        assert_eq!(compiled.outputs()[0].selector, Selector::Step { step: "detect".into() });
    }
}
