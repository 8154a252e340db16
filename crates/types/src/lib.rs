//! Strongly typed definitions shared by the Visionflow registry and engine.
//!
//! - [`kind`]: kind names and the built-in kind set
//! - [`selector`]: the `$inputs` / `$steps` reference grammar
//! - [`manifest`]: declared block schemas and output descriptors
//! - [`workflow`]: the declarative workflow document
//! - [`output`]: step records and flow-control signals

pub mod kind;
pub mod manifest;
pub mod output;
pub mod selector;
pub mod workflow;

pub use kind::{Kind, WILDCARD_KIND, builtin_kinds, is_wildcard_kind};
pub use manifest::{FieldSchema, ManifestSchema, OutputDescriptor, ReferenceDefinition};
pub use output::{FlowControl, KindedValue, StepOutput, StepRecord};
pub use selector::{PropertyValue, SelectedElement, Selector, SelectorParseError};
pub use workflow::{
    StepDefinition, WorkflowDefinition, WorkflowInput, WorkflowInputDefinition, WorkflowOutputDefinition, workflow_definition_schema,
};
