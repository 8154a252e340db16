//! Manifest introspection.
//!
//! Classifies the declared properties of a block schema into literal-valued
//! (primitive) fields and selector fields. The compiler relies on this partition to
//! decide how each step property is parsed, and the connection index relies on the
//! accepted kinds recorded for each selector field.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use visionflow_types::{ManifestSchema, ReferenceDefinition, SelectedElement};

/// Property names every step carries and no schema may redeclare.
pub const RESERVED_PROPERTIES: [&str; 2] = ["type", "name"];

/// Errors raised for malformed block schemas.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("block '{block_type}': field '{field}' accepts {element:?} selectors but declares no kinds")]
    SelectorWithoutKinds {
        block_type: String,
        field: String,
        element: SelectedElement,
    },
    #[error("block '{block_type}': field '{field}' accepts neither literals nor selectors")]
    UnusableField { block_type: String, field: String },
    #[error("block '{block_type}': field '{field}' is reserved")]
    ReservedField { block_type: String, field: String },
}

/// A property that accepts literal values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimitiveField {
    pub property_name: String,
    pub type_annotation: String,
    pub property_description: String,
    /// True when a selector is also legal for this property.
    pub selector_allowed: bool,
    pub required: bool,
    pub default: Option<Value>,
}

/// A property that accepts selectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorField {
    pub property_name: String,
    pub property_description: String,
    pub allowed_references: Vec<ReferenceDefinition>,
    /// Union of kinds accepted by input and step-output references.
    pub kinds: BTreeSet<String>,
    /// True when a whole-step reference (`$steps.<step>`) is legal.
    pub accepts_step_reference: bool,
    pub accepts_input: bool,
    pub accepts_step_output: bool,
    /// True when a literal is also legal for this property.
    pub literal_allowed: bool,
    pub required: bool,
    pub default: Option<Value>,
}

impl SelectorField {
    /// Whether a selector of the given element type may be bound to this field.
    pub fn accepts_element(&self, element: SelectedElement) -> bool {
        match element {
            SelectedElement::Input => self.accepts_input,
            SelectedElement::StepOutput => self.accepts_step_output,
            SelectedElement::Step => self.accepts_step_reference,
        }
    }

    /// Kinds accepted for a selector of the given element type.
    pub fn kinds_for(&self, element: SelectedElement) -> Vec<String> {
        let mut kinds: BTreeSet<String> = BTreeSet::new();
        for reference in self.allowed_references.iter().filter(|reference| reference.selected_element == element) {
            kinds.extend(reference.kinds.iter().cloned());
        }
        kinds.into_iter().collect()
    }
}

/// Result of introspecting a block schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedManifest {
    pub primitive_fields: IndexMap<String, PrimitiveField>,
    pub selector_fields: IndexMap<String, SelectorField>,
}

impl ParsedManifest {
    /// Whether the block declares a property with this name.
    pub fn declares(&self, property_name: &str) -> bool {
        self.primitive_fields.contains_key(property_name) || self.selector_fields.contains_key(property_name)
    }

    /// Names of all declared properties, primitives first, each in authoring order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.primitive_fields
            .keys()
            .chain(self.selector_fields.keys().filter(|name| !self.primitive_fields.contains_key(*name)))
            .map(String::as_str)
    }
}

/// Partitions a declared schema into primitive and selector fields.
pub fn parse_manifest_schema(block_type: &str, schema: &ManifestSchema) -> Result<ParsedManifest, SchemaError> {
    let mut parsed = ParsedManifest::default();

    for (field_name, field) in &schema.fields {
        if RESERVED_PROPERTIES.contains(&field_name.as_str()) {
            return Err(SchemaError::ReservedField {
                block_type: block_type.to_string(),
                field: field_name.clone(),
            });
        }
        if field.type_annotation.is_none() && field.references.is_empty() {
            return Err(SchemaError::UnusableField {
                block_type: block_type.to_string(),
                field: field_name.clone(),
            });
        }
        for reference in &field.references {
            if reference.selected_element != SelectedElement::Step && reference.kinds.is_empty() {
                return Err(SchemaError::SelectorWithoutKinds {
                    block_type: block_type.to_string(),
                    field: field_name.clone(),
                    element: reference.selected_element,
                });
            }
        }

        let description = field.description.clone().unwrap_or_default();
        let selector_allowed = !field.references.is_empty();

        if let Some(type_annotation) = &field.type_annotation {
            parsed.primitive_fields.insert(
                field_name.clone(),
                PrimitiveField {
                    property_name: field_name.clone(),
                    type_annotation: type_annotation.clone(),
                    property_description: description.clone(),
                    selector_allowed,
                    required: field.required,
                    default: field.default.clone(),
                },
            );
        }

        if selector_allowed {
            let has_element = |element: SelectedElement| field.references.iter().any(|reference| reference.selected_element == element);
            let kinds = field
                .references
                .iter()
                .filter(|reference| reference.selected_element != SelectedElement::Step)
                .flat_map(|reference| reference.kinds.iter().cloned())
                .collect();
            parsed.selector_fields.insert(
                field_name.clone(),
                SelectorField {
                    property_name: field_name.clone(),
                    property_description: description,
                    allowed_references: field.references.clone(),
                    kinds,
                    accepts_step_reference: has_element(SelectedElement::Step),
                    accepts_input: has_element(SelectedElement::Input),
                    accepts_step_output: has_element(SelectedElement::StepOutput),
                    literal_allowed: field.type_annotation.is_some(),
                    required: field.required,
                    default: field.default.clone(),
                },
            );
        }
    }

    Ok(parsed)
}
