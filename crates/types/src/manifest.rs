//! Declared block manifest schemas and output descriptors.
//!
//! Every block type declares the properties a step of that type may carry and the
//! outputs it produces. Schemas are plain data so they can be authored in Rust or
//! loaded from JSON alongside the block implementation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::selector::SelectedElement;

/// Declared schema of a block manifest, keyed by property name in authoring order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManifestSchema {
    /// Short description of what the block does.
    #[serde(default)]
    pub description: Option<String>,
    /// Declared properties, excluding the reserved `type` and `name` keys.
    #[serde(default)]
    pub fields: IndexMap<String, FieldSchema>,
}

impl ManifestSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}

/// Declaration of one manifest property.
///
/// A property with a `type_annotation` accepts literal values. A property with one
/// or more `references` accepts selectors. When both are present either form is legal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldSchema {
    #[serde(default)]
    pub description: Option<String>,
    /// Literal type annotation such as `str`, `float` or `List[str]`.
    #[serde(default)]
    pub type_annotation: Option<String>,
    /// When true the property must be present in every step definition.
    #[serde(default)]
    pub required: bool,
    /// Value used when an optional property is omitted.
    #[serde(default)]
    pub default: Option<Value>,
    /// Selector forms this property accepts.
    #[serde(default)]
    pub references: Vec<ReferenceDefinition>,
}

impl FieldSchema {
    /// A literal-only property.
    pub fn literal(type_annotation: impl Into<String>) -> Self {
        Self {
            type_annotation: Some(type_annotation.into()),
            ..Self::default()
        }
    }

    /// A selector-only property accepting the given references.
    pub fn selector(references: Vec<ReferenceDefinition>) -> Self {
        Self {
            references,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference: ReferenceDefinition) -> Self {
        self.references.push(reference);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One selector form accepted by a property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceDefinition {
    pub selected_element: SelectedElement,
    /// Accepted kinds; ignored for whole-step references.
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl ReferenceDefinition {
    pub fn input<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_element: SelectedElement::Input,
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn step_output<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_element: SelectedElement::StepOutput,
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn step() -> Self {
        Self {
            selected_element: SelectedElement::Step,
            kinds: Vec::new(),
        }
    }
}

/// An output a block type produces. An output may carry one of several kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub name: String,
    pub kinds: Vec<String>,
}

impl OutputDescriptor {
    pub fn new<I, S>(name: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }
}
