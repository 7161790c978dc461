//! The tolerant batch decoder.
//!
//! `RepairPipeline` implements the `BatchRepairer` trait from `aimi-core`.
//! Decoding runs in two phases:
//!
//! 1. **Text**: strict parse first; on failure the first applicable
//!    repair rule rewrites the text and parsing is retried. Each rule runs
//!    at most once, so the loop always ends.
//! 2. **Elements**: every array element is repaired on its own and its
//!    request checked against the action's JSON Schema. A bad element is
//!    rejected without affecting its siblings.

use serde_json::Value;
use tracing::{debug, info};

use aimi_contracts::{
    action::ActionRecord,
    error::{AimiError, AimiResult},
    registry::ActionRegistry,
};
use aimi_core::traits::BatchRepairer;

use crate::{
    rules::{RepairRule, DEFAULT_RULES},
    semantic::{check_request_shape, repair_element},
};

const WRAP_RULE: &str = "wrap_single_object";
const UNESCAPE_RULE: &str = "unescape_doubled_quotes";

/// The outcome of text repair.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub elements: Vec<Value>,
    /// Names of the rules that fired, in order. Empty for well-formed input.
    pub applied: Vec<&'static str>,
}

/// The tolerant decoder for buffered model output.
pub struct RepairPipeline {
    rules: Vec<(&'static str, RepairRule)>,
}

impl RepairPipeline {
    /// A pipeline with the default rules in their default order.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }

    /// Recover the action array from `text`.
    ///
    /// # Errors
    ///
    /// `RepairFailure` carrying the original text when no sequence of rules
    /// yields an array.
    pub fn repair_text(&self, text: &str) -> AimiResult<Repaired> {
        let mut current = text.to_string();
        let mut applied: Vec<&'static str> = Vec::new();

        loop {
            let failure = match serde_json::from_str::<Value>(&current) {
                Ok(Value::Array(elements)) => return Ok(Repaired { elements, applied }),
                Ok(Value::Object(object)) if !applied.contains(&WRAP_RULE) => {
                    applied.push(WRAP_RULE);
                    return Ok(Repaired {
                        elements: vec![Value::Object(object)],
                        applied,
                    });
                }
                // A whole array double-encoded as one JSON string.
                Ok(Value::String(inner)) if !applied.contains(&UNESCAPE_RULE) => {
                    debug!(rule = UNESCAPE_RULE, "repair rule applied");
                    applied.push(UNESCAPE_RULE);
                    current = inner;
                    continue;
                }
                Ok(other) => format!("decoded a {} instead of an action array", kind_of(&other)),
                Err(e) => e.to_string(),
            };

            let next = self
                .rules
                .iter()
                .filter(|(name, _)| !applied.contains(name))
                .find_map(|(name, rule)| rule(&current).map(|text| (*name, text)));

            match next {
                Some((name, rewritten)) => {
                    debug!(rule = name, before = current.len(), after = rewritten.len(), "repair rule applied");
                    applied.push(name);
                    current = rewritten;
                }
                None => {
                    return Err(AimiError::RepairFailure {
                        reason: failure,
                        original: text.to_string(),
                    })
                }
            }
        }
    }
}

impl Default for RepairPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl BatchRepairer for RepairPipeline {
    fn decode(
        &self,
        text: &str,
        registry: &ActionRegistry,
    ) -> AimiResult<Vec<AimiResult<ActionRecord>>> {
        let repaired = self.repair_text(text)?;
        if !repaired.applied.is_empty() {
            info!(rules = ?repaired.applied, "batch text repaired");
        }

        Ok(repaired
            .elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                let record = repair_element(index, element, registry)?;
                check_request_shape(&record, registry)?;
                Ok(record)
            })
            .collect())
    }
}
