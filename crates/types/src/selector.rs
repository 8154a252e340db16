//! Selector grammar.
//!
//! Step properties may reference external inputs or the outputs of other steps
//! using one of three forms:
//!
//! - `$inputs.<name>` selects a runtime input
//! - `$steps.<step>` selects a whole step (used by flow-control routing)
//! - `$steps.<step>.<output>` selects a single output of a step
//!
//! Selectors are parsed once while compiling a workflow; execution only ever sees
//! the parsed [`Selector`] values.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Prefix shared by every selector string.
pub const SELECTOR_PREFIX: char = '$';

static INPUT_SELECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$inputs\.([A-Za-z0-9_\-]+)$").expect("valid input selector regex"));
static STEP_SELECTOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$steps\.([A-Za-z0-9_\-]+)(?:\.([A-Za-z0-9_\-]+))?$").expect("valid step selector regex"));

/// Error raised when a `$`-prefixed string does not match the selector grammar.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed selector '{raw}': expected '$inputs.<name>', '$steps.<step>' or '$steps.<step>.<output>'")]
pub struct SelectorParseError {
    pub raw: String,
}

/// A parsed reference to an external input, a whole step, or a step output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "selected_element", rename_all = "snake_case")]
pub enum Selector {
    /// `$inputs.<name>`
    Input { name: String },
    /// `$steps.<step>`
    Step { step: String },
    /// `$steps.<step>.<output>`
    StepOutput { step: String, output: String },
}

impl Selector {
    /// Parses a selector string.
    pub fn parse(raw: &str) -> Result<Self, SelectorParseError> {
        let trimmed = raw.trim();
        if let Some(captures) = INPUT_SELECTOR.captures(trimmed) {
            return Ok(Selector::Input {
                name: captures[1].to_string(),
            });
        }
        if let Some(captures) = STEP_SELECTOR.captures(trimmed) {
            let step = captures[1].to_string();
            return Ok(match captures.get(2) {
                Some(output) => Selector::StepOutput {
                    step,
                    output: output.as_str().to_string(),
                },
                None => Selector::Step { step },
            });
        }
        Err(SelectorParseError { raw: raw.to_string() })
    }

    /// Returns true when the string looks like a selector and should be parsed as one.
    pub fn looks_like_selector(raw: &str) -> bool {
        raw.trim_start().starts_with(SELECTOR_PREFIX)
    }

    /// Step name referenced by this selector, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Selector::Input { .. } => None,
            Selector::Step { step } | Selector::StepOutput { step, .. } => Some(step),
        }
    }

    pub fn selected_element(&self) -> SelectedElement {
        match self {
            Selector::Input { .. } => SelectedElement::Input,
            Selector::Step { .. } => SelectedElement::Step,
            Selector::StepOutput { .. } => SelectedElement::StepOutput,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Input { name } => write!(f, "$inputs.{name}"),
            Selector::Step { step } => write!(f, "$steps.{step}"),
            Selector::StepOutput { step, output } => write!(f, "$steps.{step}.{output}"),
        }
    }
}

/// Which kind of graph element a selector points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedElement {
    /// A runtime input supplied by the caller.
    Input,
    /// A specific output of an upstream step.
    StepOutput,
    /// An upstream step as a whole.
    Step,
}

/// A step property after selector parsing: either a literal or a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Selector(Selector),
    Literal(Value),
}

impl PropertyValue {
    pub fn as_selector(&self) -> Option<&Selector> {
        match self {
            PropertyValue::Selector(selector) => Some(selector),
            PropertyValue::Literal(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_selector_forms() {
        assert_eq!(
            Selector::parse("$inputs.image").unwrap(),
            Selector::Input { name: "image".into() }
        );
        assert_eq!(Selector::parse("$steps.detect").unwrap(), Selector::Step { step: "detect".into() });
        assert_eq!(
            Selector::parse("$steps.detect.predictions").unwrap(),
            Selector::StepOutput {
                step: "detect".into(),
                output: "predictions".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_selectors() {
        for raw in ["$inputs", "$inputs.a.b", "$steps.", "$steps.a.b.c", "$outputs.x", "$steps.a b"] {
            let error = Selector::parse(raw).expect_err(raw);
            assert_eq!(error.raw, raw);
        }
    }

    #[test]
    fn display_matches_source_grammar() {
        for raw in ["$inputs.image", "$steps.crop", "$steps.crop.crops"] {
            assert_eq!(Selector::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn step_name_is_absent_for_inputs() {
        assert_eq!(Selector::parse("$inputs.x").unwrap().step_name(), None);
        assert_eq!(Selector::parse("$steps.s.o").unwrap().step_name(), Some("s"));
    }
}
