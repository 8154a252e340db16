//! Outward description of registered blocks and kinds.
//!
//! Tooling (documentation builders, editors) consumes this view instead of the
//! registry itself; it carries no constructors and serializes cleanly.

use serde::Serialize;
use visionflow_types::{Kind, OutputDescriptor};

use crate::{
    blocks::BlockRegistry,
    connections::BlocksConnections,
    introspection::ParsedManifest,
};

/// Serializable summary of one block type.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockDescription {
    pub block_type: String,
    pub description: Option<String>,
    pub manifest: ParsedManifest,
    pub outputs: Vec<OutputDescriptor>,
    pub accepts_batch_input: bool,
    pub runs_in_engine: bool,
    pub init_parameters: Vec<String>,
}

/// Every registered block type, the declared kinds, and the connection index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlocksDescription {
    pub blocks: Vec<BlockDescription>,
    pub declared_kinds: Vec<Kind>,
    pub connections: BlocksConnections,
}

impl BlocksDescription {
    pub fn block(&self, block_type: &str) -> Option<&BlockDescription> {
        self.blocks.iter().find(|block| block.block_type == block_type)
    }
}

/// Builds the description in registration order.
pub fn describe_blocks(registry: &BlockRegistry) -> BlocksDescription {
    let blocks = registry
        .blocks()
        .map(|block| BlockDescription {
            block_type: block.block_type().to_string(),
            description: block.descriptor.schema.description.clone(),
            manifest: block.manifest.clone(),
            outputs: block.descriptor.outputs.clone(),
            accepts_batch_input: block.descriptor.accepts_batch_input,
            runs_in_engine: block.descriptor.runs_in_engine,
            init_parameters: block.descriptor.init_parameters.clone(),
        })
        .collect();

    BlocksDescription {
        blocks,
        declared_kinds: registry.kinds().kinds().cloned().collect(),
        connections: registry.connections().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockInputs, BlockResult, WorkflowBlock};
    use crate::blocks::BlockDescriptor;
    use crate::catalog::KindCatalog;
    use crate::init::CACHE_PARAMETER;
    use async_trait::async_trait;
    use visionflow_types::kind::{IMAGE_KIND, STRING_KIND};
    use visionflow_types::{FieldSchema, ManifestSchema, ReferenceDefinition, StepRecord};

    struct Reader;

    #[async_trait]
    impl WorkflowBlock for Reader {
        async fn run_locally(&self, _inputs: BlockInputs) -> anyhow::Result<BlockResult> {
            Ok(BlockResult::single(StepRecord::new()))
        }
    }

    #[test]
    fn describes_blocks_in_registration_order() {
        let ocr = BlockDescriptor::stateless(
            "OCRModel",
            ManifestSchema::new()
                .with_description("Reads text")
                .with_field("image", FieldSchema::selector(vec![ReferenceDefinition::input([IMAGE_KIND])]).required()),
            Reader,
        )
        .with_output(OutputDescriptor::new("result", [STRING_KIND]))
        .requiring(CACHE_PARAMETER);
        let echo = BlockDescriptor::stateless("Echo", ManifestSchema::new().with_field("text", FieldSchema::literal("str")), Reader);

        let registry = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(ocr)
            .register(echo)
            .build()
            .expect("registry");
        let description = describe_blocks(&registry);

        let names: Vec<&str> = description.blocks.iter().map(|block| block.block_type.as_str()).collect();
        assert_eq!(names, vec!["OCRModel", "Echo"]);

        let ocr = description.block("OCRModel").expect("ocr");
        assert_eq!(ocr.description.as_deref(), Some("Reads text"));
        assert_eq!(ocr.init_parameters, vec![CACHE_PARAMETER.to_string()]);
        assert!(ocr.manifest.selector_fields.contains_key("image"));
        assert_eq!(description.declared_kinds.len(), registry.kinds().len());

        let json = serde_json::to_value(&description).expect("serialize");
        assert_eq!(json["blocks"][1]["block_type"], "Echo");
        assert!(json["connections"]["input_connections"]["block_wise"].is_object());
    }
}
