//! # Visionflow Engine
//!
//! Compiles declarative computer-vision workflows into a typed, ordered step
//! graph and executes them against registered blocks, locally or through remote
//! inference backends.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::json;
//! use visionflow_engine::{EngineConfig, RuntimeParameters, builtin_registry_builder, load_workflow_file, run_workflow};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Register model blocks next to the built-in flow-control block.
//! let registry = builtin_registry_builder().build()?;
//! let definition = load_workflow_file("workflow.yaml")?;
//! let parameters = RuntimeParameters::new().with("image", json!("https://example.com/dog.jpg"));
//!
//! let result = run_workflow(&definition, &registry, parameters, &EngineConfig::from_env()).await?;
//! for (name, value) in &result.outputs {
//!     println!("{name}: {value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`compiler`**: manifest validation, selector type checks, deterministic ordering
//! - **`resolve`**: per-run context and selector resolution
//! - **`executor`**: step dispatch, batch fan-out, flow-control skipping
//! - **`flow_control`**: the built-in `ContinueIf` block
//! - **`config`**: environment-driven execution mode and remote limits

use std::{fs, path::Path};

pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod flow_control;
pub mod resolve;

#[cfg(test)]
mod testing;

pub use compiler::{CompiledInput, CompiledOutput, CompiledProperty, CompiledStep, CompiledWorkflow, compile_workflow};
pub use config::EngineConfig;
pub use error::{CompileError, ExecutionError, WorkflowError};
pub use executor::{ExecutionEngine, LocalDispatcher, RemoteDispatcher, StepDispatcher, StepReport, StepStatus, WorkflowRunResult};
pub use flow_control::{CONTINUE_IF_BLOCK_TYPE, continue_if_descriptor};
pub use resolve::{ExecutionContext, OutputsLookup, ParameterValue, RuntimeParameters, resolve, resolve_accepting};

use visionflow_registry::{BlockRegistry, BlockRegistryBuilder, KindCatalog};
use visionflow_types::WorkflowDefinition;

/// Registry builder seeded with the built-in kinds and blocks.
pub fn builtin_registry_builder() -> BlockRegistryBuilder {
    BlockRegistry::builder(KindCatalog::with_builtin_kinds()).register(continue_if_descriptor())
}

/// Parses a workflow document. JSON documents are accepted as YAML.
pub fn parse_workflow_str(content: &str) -> Result<WorkflowDefinition, serde_yaml::Error> {
    serde_yaml::from_str(content)
}

/// Loads a workflow document (JSON or YAML) from disk.
pub fn load_workflow_file(file_path: impl AsRef<Path>) -> Result<WorkflowDefinition, WorkflowError> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).map_err(|source| WorkflowError::Read {
        path: file_path.to_path_buf(),
        source,
    })?;
    parse_workflow_str(&content).map_err(|source| WorkflowError::Parse {
        path: file_path.to_path_buf(),
        source,
    })
}

/// Compiles `definition` and executes it once with the dispatcher and init
/// parameters derived from `config`.
pub async fn run_workflow(
    definition: &WorkflowDefinition,
    registry: &BlockRegistry,
    parameters: RuntimeParameters,
    config: &EngineConfig,
) -> Result<WorkflowRunResult, WorkflowError> {
    let compiled = compile_workflow(definition, registry)?;
    let engine = ExecutionEngine::new(registry, config.dispatcher()).with_init_parameters(config.init_parameters());
    Ok(engine.execute(&compiled, parameters).await?)
}
