//! Error taxonomy for compiling and running workflows.
//!
//! Compile errors abort before any step runs and always name the offending step
//! (and field where one applies). Execution errors abort the in-flight run; no
//! partial result is returned.

use std::path::PathBuf;

use thiserror::Error;
use visionflow_registry::RegistryError;
use visionflow_types::SelectorParseError;

/// Raised while turning a workflow definition into an executable plan.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("step '{step}' uses unknown block type '{block_type}'")]
    UnknownBlockType { step: String, block_type: String },
    #[error("step name '{step}' is declared more than once")]
    DuplicateStepName { step: String },
    #[error("input '{input}' is declared more than once")]
    DuplicateInputName { input: String },
    #[error("input '{input}' declares unknown kind '{kind}'")]
    UnknownInputKind { input: String, kind: String },
    #[error("workflow output '{output}' is declared more than once")]
    DuplicateOutputName { output: String },
    #[error("step '{step}', field '{field}': {reason}")]
    InvalidStepManifest { step: String, field: String, reason: String },
    #[error("step '{step}', field '{field}': {source}")]
    MalformedSelector {
        step: String,
        field: String,
        #[source]
        source: SelectorParseError,
    },
    #[error("step '{step}', field '{field}': selector '{selector}' {reason}")]
    InvalidReference {
        step: String,
        field: String,
        selector: String,
        reason: String,
    },
    #[error("step '{step}', field '{field}': selector '{selector}' yields kinds {actual:?} but the field accepts {expected:?}")]
    TypeMismatch {
        step: String,
        field: String,
        selector: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("workflow contains a dependency cycle through step '{step}'")]
    CyclicDependency { step: String },
    #[error("workflow output '{output}' selects '{selector}': {reason}")]
    UnknownOutputReference { output: String, selector: String, reason: String },
}

impl CompileError {
    /// Step the error is attributed to, when there is one.
    pub fn step(&self) -> Option<&str> {
        match self {
            CompileError::UnknownBlockType { step, .. }
            | CompileError::DuplicateStepName { step }
            | CompileError::InvalidStepManifest { step, .. }
            | CompileError::MalformedSelector { step, .. }
            | CompileError::InvalidReference { step, .. }
            | CompileError::TypeMismatch { step, .. }
            | CompileError::CyclicDependency { step } => Some(step),
            CompileError::DuplicateInputName { .. }
            | CompileError::UnknownInputKind { .. }
            | CompileError::DuplicateOutputName { .. }
            | CompileError::UnknownOutputReference { .. } => None,
        }
    }
}

/// Raised while executing a compiled workflow.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("runtime input '{input}' was not supplied and has no default")]
    UnresolvedInput { input: String },
    /// Signals a scheduling defect: the compiler guarantees producers run first.
    #[error("step '{step}' was referenced before it produced any output")]
    StepNotYetExecuted { step: String },
    #[error("step '{step}' did not produce output '{output}'")]
    UnknownOutputField { step: String, output: String },
    #[error("output '{output}' of step '{step}' carries kind '{kind}' which the consumer does not accept (accepted: {accepted:?})")]
    OutputKindMismatch {
        step: String,
        output: String,
        kind: String,
        accepted: Vec<String>,
    },
    #[error("step '{step}' failed")]
    StepExecution {
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("block for step '{step}' could not be initialized")]
    Initialization {
        step: String,
        #[source]
        source: RegistryError,
    },
}

impl ExecutionError {
    pub(crate) fn step_failed(step: &str, source: anyhow::Error) -> Self {
        ExecutionError::StepExecution {
            step: step.to_string(),
            source,
        }
    }
}

/// Umbrella error for the convenience entry points.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
