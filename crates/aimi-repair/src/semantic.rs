//! Per-element semantic repair and request shape checks.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use aimi_contracts::{
    action::{ActionRecord, ExecuteLevel},
    error::{AimiError, AimiResult},
    registry::{implies_system, ActionRegistry},
};

fn label(index: usize) -> String {
    format!("root[{index}]")
}

/// Normalise one decoded element into an [`ActionRecord`].
///
/// - a legacy `action` key (a call name, or an object holding `call` and
///   `request`) is split into `call` and `request`
/// - a legacy `input` key becomes `request`
/// - `execute` is filled from the call prefix when absent, then overwritten
///   by the registry for registered calls
/// - a request without a `type` marker gains `"type": "object"`, unless the
///   action takes no arguments
pub fn repair_element(
    index: usize,
    element: Value,
    registry: &ActionRegistry,
) -> AimiResult<ActionRecord> {
    let Value::Object(mut map) = element else {
        return Err(AimiError::RequestShape {
            call: label(index),
            reason: "element is not an object".to_string(),
        });
    };

    if !map.contains_key("call") {
        match map.remove("action") {
            Some(Value::String(call)) => {
                map.insert("call".to_string(), Value::String(call));
            }
            Some(Value::Object(mut legacy)) => {
                if let Some(call) = legacy.remove("call").or_else(|| legacy.remove("name")) {
                    map.insert("call".to_string(), call);
                }
                if let Some(request) = legacy.remove("request").or_else(|| legacy.remove("input")) {
                    map.entry("request").or_insert(request);
                }
            }
            Some(other) => debug!(index, action = %other, "unusable legacy action key dropped"),
            None => {}
        }
    }
    if !map.contains_key("request") {
        if let Some(input) = map.remove("input") {
            map.insert("request".to_string(), input);
        }
    }

    let call = match map.get("call") {
        Some(Value::String(call)) if !call.is_empty() => call.clone(),
        _ => {
            return Err(AimiError::RequestShape {
                call: label(index),
                reason: "record has no call".to_string(),
            })
        }
    };

    if !map.contains_key("execute") && implies_system(&call) {
        map.insert("execute".to_string(), json!(ExecuteLevel::System.as_str()));
    }
    if let Some(level) = registry.execute_level(&call) {
        map.insert("execute".to_string(), json!(level.as_str()));
    }
    if let Some(claimed) = map.get("execute").cloned() {
        let level = claimed.as_str().and_then(ExecuteLevel::parse).unwrap_or_else(|| {
            warn!(index, call = %call, claimed = %claimed, "unknown execute level replaced");
            ExecuteLevel::default()
        });
        map.insert("execute".to_string(), json!(level.as_str()));
    }

    let takes_arguments = registry
        .get(&call)
        .map_or(true, |item| item.takes_arguments());
    if takes_arguments {
        fill_type_marker(&mut map);
    }

    serde_json::from_value(Value::Object(map)).map_err(|e| AimiError::RequestShape {
        call,
        reason: e.to_string(),
    })
}

fn fill_type_marker(map: &mut Map<String, Value>) {
    match map.get_mut("request") {
        Some(Value::Object(request)) => {
            request
                .entry("type")
                .or_insert_with(|| Value::String("object".to_string()));
        }
        Some(Value::Null) | None => {
            map.insert("request".to_string(), json!({ "type": "object" }));
        }
        Some(_) => {}
    }
}

/// Check `record.request` against its action's JSON Schema, if it has one.
pub fn check_request_shape(record: &ActionRecord, registry: &ActionRegistry) -> AimiResult<()> {
    let Some(schema) = registry
        .get(&record.call)
        .and_then(|item| item.request_schema.as_ref())
    else {
        return Ok(());
    };

    let validator = jsonschema::validator_for(schema).map_err(|e| AimiError::ConfigError {
        reason: format!("invalid request schema for '{}': {e}", record.call),
    })?;

    let violations: Vec<String> = validator
        .iter_errors(&record.request)
        .map(|error| format!("{error} at '{}'", error.instance_path))
        .collect();
    if violations.is_empty() {
        return Ok(());
    }

    warn!(call = %record.call, violations = violations.len(), "request schema violation");
    Err(AimiError::RequestShape {
        call: record.call.clone(),
        reason: violations.join("; "),
    })
}
