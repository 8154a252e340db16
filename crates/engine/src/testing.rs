//! Fixture blocks shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use visionflow_registry::{BlockDescriptor, BlockInputs, BlockRegistry, BlockResult, KindCatalog, WorkflowBlock};
use visionflow_types::kind::{CLASSIFICATION_PREDICTION_KIND, FLOAT_ZERO_TO_ONE_KIND, IMAGE_KIND, OBJECT_DETECTION_PREDICTION_KIND};
use visionflow_types::{FieldSchema, ManifestSchema, OutputDescriptor, ReferenceDefinition, StepDefinition, StepRecord};

struct Detect;

#[async_trait]
impl WorkflowBlock for Detect {
    async fn run_locally(&self, inputs: BlockInputs) -> Result<BlockResult> {
        let image = inputs.require("image")?.clone();
        let confidence = inputs.require("confidence")?.clone();
        Ok(BlockResult::single(
            StepRecord::new().with("predictions", json!([{"source": image, "confidence": confidence}])),
        ))
    }
}

struct Nothing;

#[async_trait]
impl WorkflowBlock for Nothing {
    async fn run_locally(&self, _inputs: BlockInputs) -> Result<BlockResult> {
        Ok(BlockResult::single(StepRecord::new()))
    }
}

fn image_field() -> FieldSchema {
    FieldSchema::selector(vec![ReferenceDefinition::input([IMAGE_KIND]), ReferenceDefinition::step_output([IMAGE_KIND])]).required()
}

/// `Detect` (image -> predictions), `Classify` (image -> predictions), `Crop` (image + predictions -> crops).
pub(crate) fn fixture_registry() -> BlockRegistry {
    let detect = BlockDescriptor::stateless(
        "Detect",
        ManifestSchema::new().with_field("image", image_field()).with_field(
            "confidence",
            FieldSchema::literal("float")
                .with_reference(ReferenceDefinition::input([FLOAT_ZERO_TO_ONE_KIND]))
                .with_default(json!(0.5)),
        ),
        Detect,
    )
    .with_output(OutputDescriptor::new("predictions", [OBJECT_DETECTION_PREDICTION_KIND]));

    let classify = BlockDescriptor::stateless("Classify", ManifestSchema::new().with_field("image", image_field()), Nothing)
        .with_output(OutputDescriptor::new("predictions", [CLASSIFICATION_PREDICTION_KIND]));

    let crop = BlockDescriptor::stateless(
        "Crop",
        ManifestSchema::new().with_field("image", image_field()).with_field(
            "predictions",
            FieldSchema::selector(vec![ReferenceDefinition::step_output([OBJECT_DETECTION_PREDICTION_KIND])]).required(),
        ),
        Nothing,
    )
    .with_output(OutputDescriptor::new("crops", [IMAGE_KIND]));

    BlockRegistry::builder(KindCatalog::with_builtin_kinds())
        .register(detect)
        .register(classify)
        .register(crop)
        .build()
        .expect("fixture registry")
}

pub(crate) fn step(block_type: &str, name: &str) -> StepDefinition {
    StepDefinition::new(block_type, name)
}
