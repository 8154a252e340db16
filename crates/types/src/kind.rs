//! Kinds: named semantic types attached to block inputs and outputs.
//!
//! A kind is identified by its name. Producers declare which kinds an output may
//! carry and consumers declare which kinds a selector field accepts; the engine
//! refuses to connect the two unless the kind sets intersect. The wildcard kind
//! (`*`) is compatible with every other kind.

use serde::{Deserialize, Serialize};

/// Name of the universal kind that is compatible with everything.
pub const WILDCARD_KIND: &str = "*";
pub const IMAGE_KIND: &str = "image";
pub const BATCH_OF_IMAGES_KIND: &str = "Batch[image]";
pub const ROBOFLOW_MODEL_ID_KIND: &str = "roboflow_model_id";
pub const ROBOFLOW_PROJECT_KIND: &str = "roboflow_project";
pub const ROBOFLOW_API_KEY_KIND: &str = "roboflow_api_key";
pub const FLOAT_ZERO_TO_ONE_KIND: &str = "float_zero_to_one";
pub const LIST_OF_VALUES_KIND: &str = "list_of_values";
pub const BOOLEAN_KIND: &str = "boolean";
pub const BATCH_OF_BOOLEAN_KIND: &str = "Batch[boolean]";
pub const INTEGER_KIND: &str = "integer";
pub const STRING_KIND: &str = "string";
pub const BATCH_OF_STRING_KIND: &str = "Batch[string]";
pub const FLOAT_KIND: &str = "float";
pub const DICTIONARY_KIND: &str = "dictionary";
pub const BATCH_OF_DICTIONARY_KIND: &str = "Batch[dictionary]";
pub const DETECTION_KIND: &str = "detection";
pub const POINT_KIND: &str = "point";
pub const ZONE_KIND: &str = "zone";
pub const OBJECT_DETECTION_PREDICTION_KIND: &str = "object_detection_prediction";
pub const BATCH_OF_OBJECT_DETECTION_PREDICTION_KIND: &str = "Batch[object_detection_prediction]";
pub const INSTANCE_SEGMENTATION_PREDICTION_KIND: &str = "instance_segmentation_prediction";
pub const KEYPOINT_DETECTION_PREDICTION_KIND: &str = "keypoint_detection_prediction";
pub const CLASSIFICATION_PREDICTION_KIND: &str = "classification_prediction";
pub const BATCH_OF_CLASSIFICATION_PREDICTION_KIND: &str = "Batch[classification_prediction]";
pub const BATCH_OF_TOP_CLASS_KIND: &str = "Batch[top_class]";
pub const PARENT_ID_KIND: &str = "parent_id";
pub const BATCH_OF_PARENT_ID_KIND: &str = "Batch[parent_id]";
pub const PREDICTION_TYPE_KIND: &str = "prediction_type";
pub const BATCH_OF_PREDICTION_TYPE_KIND: &str = "Batch[prediction_type]";
pub const IMAGE_METADATA_KIND: &str = "image_metadata";
pub const BATCH_OF_IMAGE_METADATA_KIND: &str = "Batch[image_metadata]";
pub const BATCH_OF_QR_CODE_DETECTION_KIND: &str = "Batch[qr_code_detection]";
pub const BATCH_OF_BAR_CODE_DETECTION_KIND: &str = "Batch[bar_code_detection]";

/// A named semantic type flowing through the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Kind {
    /// Unique kind name (for example, `object_detection_prediction`).
    pub name: String,
    /// Short human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Extended documentation describing the value layout.
    #[serde(default)]
    pub docs: Option<String>,
}

impl Kind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            docs: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    /// Returns true when this is the universal wildcard kind.
    pub fn is_wildcard(&self) -> bool {
        is_wildcard_kind(&self.name)
    }
}

/// Returns true when `name` identifies the wildcard kind.
pub fn is_wildcard_kind(name: &str) -> bool {
    name == WILDCARD_KIND
}

/// Built-in kinds shipped with the engine, in registration order.
pub fn builtin_kinds() -> Vec<Kind> {
    let described = |name: &str, description: &str| Kind::new(name).with_description(description);
    vec![
        described(WILDCARD_KIND, "Equivalent of any element").with_docs(
            "Used as a generic symbol to denote that the value may be of any kind. \
             Connections involving this kind are always accepted at compile time.",
        ),
        described(IMAGE_KIND, "Image in workflows").with_docs(
            "Images are passed as dictionaries with a `type` (url, base64, numpy) and a `value`, \
             optionally carrying `parent_id` and origin coordinates when produced by a crop.",
        ),
        described(BATCH_OF_IMAGES_KIND, "Image in workflows"),
        described(ROBOFLOW_MODEL_ID_KIND, "Roboflow model id"),
        described(ROBOFLOW_PROJECT_KIND, "Roboflow project name"),
        described(ROBOFLOW_API_KEY_KIND, "Roboflow API key"),
        described(FLOAT_ZERO_TO_ONE_KIND, "`float` value in range `[0.0, 1.0]`"),
        described(LIST_OF_VALUES_KIND, "List of values of any types"),
        described(BOOLEAN_KIND, "Boolean flag"),
        described(BATCH_OF_BOOLEAN_KIND, "Boolean values batch"),
        described(INTEGER_KIND, "Integer value"),
        described(STRING_KIND, "String value"),
        described(BATCH_OF_STRING_KIND, "Batch of string values"),
        described(FLOAT_KIND, "Float value"),
        described(DICTIONARY_KIND, "Dictionary"),
        described(BATCH_OF_DICTIONARY_KIND, "Batch of dictionaries"),
        described(DETECTION_KIND, "Single element of detections-based prediction"),
        described(POINT_KIND, "Single point in 2D"),
        described(ZONE_KIND, "Definition of polygon zone"),
        described(OBJECT_DETECTION_PREDICTION_KIND, "Prediction with detected bounding boxes").with_docs(
            "Each record carries `image` metadata and a `predictions` list of boxes with \
             `x`, `y`, `width`, `height`, `confidence`, `class` and `class_id`.",
        ),
        described(BATCH_OF_OBJECT_DETECTION_PREDICTION_KIND, "Batch of predictions with bounding boxes"),
        described(INSTANCE_SEGMENTATION_PREDICTION_KIND, "Prediction with detected bounding boxes and segmentation masks"),
        described(KEYPOINT_DETECTION_PREDICTION_KIND, "Prediction with detected bounding boxes and detected keypoints"),
        described(CLASSIFICATION_PREDICTION_KIND, "Predictions from classifier"),
        described(BATCH_OF_CLASSIFICATION_PREDICTION_KIND, "Batch of predictions from classifier"),
        described(BATCH_OF_TOP_CLASS_KIND, "Batch of string values representing top class predicted by classification model"),
        described(PARENT_ID_KIND, "Identifier of parent for step output"),
        described(BATCH_OF_PARENT_ID_KIND, "Identifier of parent for step output"),
        described(PREDICTION_TYPE_KIND, "String value with type of prediction"),
        described(BATCH_OF_PREDICTION_TYPE_KIND, "String value with type of prediction"),
        described(IMAGE_METADATA_KIND, "Dictionary with image metadata required by supervision"),
        described(BATCH_OF_IMAGE_METADATA_KIND, "Dictionary with image metadata required by supervision"),
        described(BATCH_OF_QR_CODE_DETECTION_KIND, "Prediction with QR code detection"),
        described(BATCH_OF_BAR_CODE_DETECTION_KIND, "Prediction with barcode detection"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_kind_names_are_unique() {
        let kinds = builtin_kinds();
        let names: HashSet<&str> = kinds.iter().map(|kind| kind.name.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn wildcard_is_registered_first() {
        let kinds = builtin_kinds();
        assert!(kinds[0].is_wildcard());
        assert!(kinds.iter().skip(1).all(|kind| !kind.is_wildcard()));
    }
}
