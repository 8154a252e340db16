//! Block and kind registry for Visionflow workflows.
//!
//! This crate owns everything the compiler needs to know about block types before
//! a workflow is seen: the kind catalog, introspected manifests, block
//! constructors, and the derived connection index.

pub mod block;
pub mod blocks;
pub mod catalog;
pub mod connections;
pub mod describe;
pub mod init;
pub mod introspection;

pub use block::{BlockInputs, BlockResult, ResolvedValue, WorkflowBlock};
pub use blocks::{BlockDescriptor, BlockFactory, BlockRegistry, BlockRegistryBuilder, RegisteredBlock, RegistryError};
pub use catalog::{KindCatalog, KindError, kinds_compatible};
pub use connections::{BlocksConnections, ConnectionsIndex, discover_blocks_connections};
pub use describe::{BlockDescription, BlocksDescription, describe_blocks};
pub use init::{API_KEY_PARAMETER, CACHE_PARAMETER, InitParameters, STEP_EXECUTION_MODE_PARAMETER, StepExecutionMode};
pub use introspection::{ParsedManifest, PrimitiveField, SchemaError, SelectorField, parse_manifest_schema};
