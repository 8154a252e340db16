//! Block registry.
//!
//! Maps each block type discriminator to its declared schema, output descriptors,
//! and a constructor. The registry is assembled once through
//! [`BlockRegistryBuilder`] and is immutable afterwards; every schema is
//! introspected and every referenced kind is checked against the catalog at build
//! time so later stages can rely on well-formed declarations.

use std::{collections::HashSet, fmt, sync::Arc};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;
use visionflow_types::{ManifestSchema, OutputDescriptor, SelectedElement};

use crate::{
    block::WorkflowBlock,
    catalog::KindCatalog,
    connections::{BlocksConnections, discover_blocks_connections},
    init::InitParameters,
    introspection::{ParsedManifest, SchemaError, parse_manifest_schema},
};

/// Constructor producing a block instance from the hosting process' parameters.
pub type BlockFactory = Arc<dyn Fn(&InitParameters) -> anyhow::Result<Arc<dyn WorkflowBlock>> + Send + Sync>;

/// Errors raised while building or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("block type '{block_type}' is already registered")]
    DuplicateBlockType { block_type: String },
    #[error("unknown block type '{block_type}'")]
    UnknownBlockType { block_type: String },
    #[error("block '{block_type}': {location} references unknown kind '{kind}'")]
    UnknownKind { block_type: String, location: String, kind: String },
    #[error("block '{block_type}': output '{output}' must declare at least one kind")]
    OutputWithoutKinds { block_type: String, output: String },
    #[error("block '{block_type}': output '{output}' is declared more than once")]
    DuplicateOutput { block_type: String, output: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("block '{block_type}' requires init parameter '{parameter}' which the host did not supply")]
    MissingInitParameter { block_type: String, parameter: String },
    #[error("block '{block_type}' could not be constructed")]
    Construction {
        block_type: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Declaration of a block type.
#[derive(Clone)]
pub struct BlockDescriptor {
    pub block_type: String,
    pub schema: ManifestSchema,
    pub outputs: Vec<OutputDescriptor>,
    /// When true the block receives whole batches; otherwise the engine fans out.
    pub accepts_batch_input: bool,
    /// Evaluated once by the engine over the whole resolved input, never fanned
    /// out, chunked, or routed to a remote backend. Flow-control blocks set this.
    pub runs_in_engine: bool,
    /// Names of [`InitParameters`] the factory reads.
    pub init_parameters: Vec<String>,
    pub factory: BlockFactory,
}

impl BlockDescriptor {
    pub fn new<F>(block_type: impl Into<String>, schema: ManifestSchema, factory: F) -> Self
    where
        F: Fn(&InitParameters) -> anyhow::Result<Arc<dyn WorkflowBlock>> + Send + Sync + 'static,
    {
        Self {
            block_type: block_type.into(),
            schema,
            outputs: Vec::new(),
            accepts_batch_input: false,
            runs_in_engine: false,
            init_parameters: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Convenience for blocks that need no construction parameters.
    pub fn stateless<B>(block_type: impl Into<String>, schema: ManifestSchema, block: B) -> Self
    where
        B: WorkflowBlock + 'static,
    {
        let block: Arc<dyn WorkflowBlock> = Arc::new(block);
        Self::new(block_type, schema, move |_| Ok(Arc::clone(&block)))
    }

    pub fn with_output(mut self, output: OutputDescriptor) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn accepting_batches(mut self) -> Self {
        self.accepts_batch_input = true;
        self
    }

    pub fn running_in_engine(mut self) -> Self {
        self.runs_in_engine = true;
        self
    }

    pub fn requiring(mut self, parameter: impl Into<String>) -> Self {
        self.init_parameters.push(parameter.into());
        self
    }

    pub fn output(&self, name: &str) -> Option<&OutputDescriptor> {
        self.outputs.iter().find(|output| output.name == name)
    }
}

impl fmt::Debug for BlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDescriptor")
            .field("block_type", &self.block_type)
            .field("outputs", &self.outputs)
            .field("accepts_batch_input", &self.accepts_batch_input)
            .field("runs_in_engine", &self.runs_in_engine)
            .field("init_parameters", &self.init_parameters)
            .finish_non_exhaustive()
    }
}

/// A registered block type together with its introspected manifest.
#[derive(Debug, Clone)]
pub struct RegisteredBlock {
    pub descriptor: BlockDescriptor,
    pub manifest: ParsedManifest,
}

impl RegisteredBlock {
    pub fn block_type(&self) -> &str {
        &self.descriptor.block_type
    }
}

/// Immutable index of block types keyed by discriminator, in registration order.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    kinds: KindCatalog,
    blocks: IndexMap<String, RegisteredBlock>,
    connections: BlocksConnections,
}

impl BlockRegistry {
    pub fn builder(kinds: KindCatalog) -> BlockRegistryBuilder {
        BlockRegistryBuilder {
            kinds,
            descriptors: Vec::new(),
        }
    }

    pub fn kinds(&self) -> &KindCatalog {
        &self.kinds
    }

    pub fn get(&self, block_type: &str) -> Result<&RegisteredBlock, RegistryError> {
        self.blocks.get(block_type).ok_or_else(|| RegistryError::UnknownBlockType {
            block_type: block_type.to_string(),
        })
    }

    /// Connection index derived once when the registry was built.
    pub fn connections(&self) -> &BlocksConnections {
        &self.connections
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.blocks.contains_key(block_type)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &RegisteredBlock> {
        self.blocks.values()
    }

    pub fn block_types(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    /// Constructs a block instance, checking the declared init parameters first.
    pub fn instantiate(&self, block_type: &str, parameters: &InitParameters) -> Result<Arc<dyn WorkflowBlock>, RegistryError> {
        let registered = self.get(block_type)?;
        if let Some(missing) = registered
            .descriptor
            .init_parameters
            .iter()
            .find(|parameter| !parameters.contains(parameter))
        {
            return Err(RegistryError::MissingInitParameter {
                block_type: block_type.to_string(),
                parameter: missing.clone(),
            });
        }
        (registered.descriptor.factory)(parameters).map_err(|source| RegistryError::Construction {
            block_type: block_type.to_string(),
            source,
        })
    }
}

/// Collects block descriptors and validates them into a [`BlockRegistry`].
pub struct BlockRegistryBuilder {
    kinds: KindCatalog,
    descriptors: Vec<BlockDescriptor>,
}

impl BlockRegistryBuilder {
    pub fn register(mut self, descriptor: BlockDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> Result<BlockRegistry, RegistryError> {
        let mut blocks = IndexMap::new();
        for descriptor in self.descriptors {
            if blocks.contains_key(&descriptor.block_type) {
                return Err(RegistryError::DuplicateBlockType {
                    block_type: descriptor.block_type,
                });
            }
            let manifest = parse_manifest_schema(&descriptor.block_type, &descriptor.schema)?;
            validate_outputs(&descriptor, &self.kinds)?;
            validate_reference_kinds(&descriptor, &manifest, &self.kinds)?;
            debug!(
                block_type = %descriptor.block_type,
                outputs = descriptor.outputs.len(),
                selector_fields = manifest.selector_fields.len(),
                "registered block type"
            );
            blocks.insert(descriptor.block_type.clone(), RegisteredBlock { descriptor, manifest });
        }
        let mut registry = BlockRegistry {
            kinds: self.kinds,
            blocks,
            connections: BlocksConnections::default(),
        };
        registry.connections = discover_blocks_connections(&registry);
        Ok(registry)
    }
}

fn validate_outputs(descriptor: &BlockDescriptor, kinds: &KindCatalog) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for output in &descriptor.outputs {
        if !seen.insert(output.name.as_str()) {
            return Err(RegistryError::DuplicateOutput {
                block_type: descriptor.block_type.clone(),
                output: output.name.clone(),
            });
        }
        if output.kinds.is_empty() {
            return Err(RegistryError::OutputWithoutKinds {
                block_type: descriptor.block_type.clone(),
                output: output.name.clone(),
            });
        }
        if let Some(kind) = output.kinds.iter().find(|kind| !kinds.contains(kind)) {
            return Err(RegistryError::UnknownKind {
                block_type: descriptor.block_type.clone(),
                location: format!("output '{}'", output.name),
                kind: kind.clone(),
            });
        }
    }
    Ok(())
}

fn validate_reference_kinds(descriptor: &BlockDescriptor, manifest: &ParsedManifest, kinds: &KindCatalog) -> Result<(), RegistryError> {
    for field in manifest.selector_fields.values() {
        let unknown = field
            .allowed_references
            .iter()
            .filter(|reference| reference.selected_element != SelectedElement::Step)
            .flat_map(|reference| reference.kinds.iter())
            .find(|kind| !kinds.contains(kind));
        if let Some(kind) = unknown {
            return Err(RegistryError::UnknownKind {
                block_type: descriptor.block_type.clone(),
                location: format!("field '{}'", field.property_name),
                kind: kind.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockInputs, BlockResult};
    use crate::init::API_KEY_PARAMETER;
    use async_trait::async_trait;
    use visionflow_types::kind::{IMAGE_KIND, OBJECT_DETECTION_PREDICTION_KIND};
    use visionflow_types::{FieldSchema, ReferenceDefinition, StepRecord};

    struct Nothing;

    #[async_trait]
    impl WorkflowBlock for Nothing {
        async fn run_locally(&self, _inputs: BlockInputs) -> anyhow::Result<BlockResult> {
            Ok(BlockResult::single(StepRecord::new()))
        }
    }

    fn detector() -> BlockDescriptor {
        let schema = ManifestSchema::new().with_field(
            "image",
            FieldSchema::selector(vec![ReferenceDefinition::input([IMAGE_KIND])]).required(),
        );
        BlockDescriptor::stateless("ObjectDetectionModel", schema, Nothing)
            .with_output(OutputDescriptor::new("predictions", [OBJECT_DETECTION_PREDICTION_KIND]))
    }

    #[test]
    fn build_rejects_duplicate_block_types() {
        let error = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(detector())
            .register(detector())
            .build()
            .expect_err("duplicate");
        assert!(matches!(error, RegistryError::DuplicateBlockType { block_type } if block_type == "ObjectDetectionModel"));
    }

    #[test]
    fn build_rejects_unknown_kinds() {
        let descriptor = detector().with_output(OutputDescriptor::new("extra", ["not_a_kind"]));
        let error = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(descriptor)
            .build()
            .expect_err("unknown kind");
        assert!(error.to_string().contains("unknown kind 'not_a_kind'"), "{error}");
    }

    #[test]
    fn build_surfaces_schema_errors() {
        let schema = ManifestSchema::new().with_field("image", FieldSchema::selector(vec![ReferenceDefinition::input(Vec::<String>::new())]));
        let error = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(BlockDescriptor::stateless("Broken", schema, Nothing))
            .build()
            .expect_err("schema error");
        assert!(matches!(error, RegistryError::Schema(SchemaError::SelectorWithoutKinds { .. })));
    }

    #[test]
    fn build_indexes_connections_once() {
        let cropper = BlockDescriptor::stateless(
            "Crop",
            ManifestSchema::new().with_field(
                "predictions",
                FieldSchema::selector(vec![ReferenceDefinition::step_output([OBJECT_DETECTION_PREDICTION_KIND])]).required(),
            ),
            Nothing,
        );
        let registry = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(detector())
            .register(cropper)
            .build()
            .expect("registry");

        assert!(registry.connections().can_feed_property("ObjectDetectionModel", "Crop", "predictions"));
        assert_eq!(registry.connections(), &discover_blocks_connections(&registry));
    }

    #[test]
    fn instantiate_checks_init_parameters() {
        let registry = BlockRegistry::builder(KindCatalog::with_builtin_kinds())
            .register(detector().requiring(API_KEY_PARAMETER))
            .build()
            .expect("registry");

        let error = registry
            .instantiate("ObjectDetectionModel", &InitParameters::new())
            .err()
            .expect("missing parameter");
        assert!(matches!(error, RegistryError::MissingInitParameter { parameter, .. } if parameter == API_KEY_PARAMETER));

        let parameters = InitParameters::new().with(API_KEY_PARAMETER, Some("key".to_string()));
        assert!(registry.instantiate("ObjectDetectionModel", &parameters).is_ok());
        assert!(matches!(
            registry.instantiate("Missing", &parameters).err(),
            Some(RegistryError::UnknownBlockType { .. })
        ));
    }
}
