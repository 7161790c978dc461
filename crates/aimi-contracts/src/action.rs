//! Action records and action tool descriptors.
//!
//! An `ActionRecord` is one decoded unit of the agent protocol. The model
//! emits a JSON array of them; the runtime appends accepted ones (plus the
//! system-authored results of their side effects) to the action log.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Prefix of calls the runtime executes on the model's behalf.
pub const CHAT_TO_PREFIX: &str = "chat_to_";

/// Prefix of system-authored result records. The model may never emit one.
pub const CHAT_FROM_PREFIX: &str = "chat_from_";

/// Call name of the operator's own message.
pub const OPERATOR_MESSAGE_CALL: &str = "chat_from_operator";

/// Call name of the reply delivered to the operator.
pub const OPERATOR_REPLY_CALL: &str = "chat_to_operator";

/// Who is authoritative for a record.
///
/// `System` records are either executed by the runtime or authored by it;
/// at most one model record per response may resolve to `System`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecuteLevel {
    #[serde(rename = "system")]
    System,
    #[default]
    #[serde(rename = "AI")]
    Ai,
}

impl ExecuteLevel {
    /// Parse the wire spelling. Unknown spellings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "AI" | "ai" => Some(Self::Ai),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Ai => "AI",
        }
    }
}

/// One protocol action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Logical clock value; `None` until the state store assigns one.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub call: String,
    /// Arbitrary nested argument payload. Handlers narrow it themselves.
    #[serde(default)]
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub execute: ExecuteLevel,
}

impl ActionRecord {
    /// A bare record for `call` with an empty request.
    pub fn new(call: impl Into<String>, execute: ExecuteLevel) -> Self {
        Self {
            timestamp: None,
            expect: None,
            reasoning: None,
            call: call.into(),
            request: Value::Null,
            conclusion: None,
            execute,
        }
    }

    /// A system-authored record carrying `request` as its payload.
    pub fn system(call: impl Into<String>, request: Value) -> Self {
        Self {
            request,
            ..Self::new(call, ExecuteLevel::System)
        }
    }

    pub fn is_system(&self) -> bool {
        self.execute == ExecuteLevel::System
    }
}

/// Name of the system-authored record that carries the result of `call`.
///
/// `chat_to_X` answers with `chat_from_X`; anything else with `<call>_result`.
/// The operator reply is the exception: `chat_from_operator` is reserved for
/// the operator's own messages.
pub fn result_call(call: &str) -> String {
    match call.strip_prefix(CHAT_TO_PREFIX) {
        Some(rest) if call != OPERATOR_REPLY_CALL => format!("{CHAT_FROM_PREFIX}{rest}"),
        _ => format!("{call}_result"),
    }
}

/// Accept timestamps as integers or numeric strings; anything else is unstamped.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(timestamp_from_value(&value))
}

/// Read a logical timestamp out of a loosely typed value.
///
/// Negative stamps read as 0, which is behind every clock. Non-numeric
/// values yield `None`.
pub fn timestamp_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(clamp_stamp)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(clamp_stamp))
        }
        _ => None,
    }
}

fn clamp_stamp(stamp: f64) -> Option<u64> {
    if !stamp.is_finite() {
        return None;
    }
    Some(if stamp <= 0.0 { 0 } else { stamp as u64 })
}

/// A static registry entry describing one callable action.
///
/// Loaded from configuration at session start and immutable afterwards.
/// The model is shown these entries and may only call what they name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionToolItem {
    pub call: String,
    pub description: String,
    /// Request-shape template shown to the model. `Null` marks a
    /// no-argument action.
    #[serde(default)]
    pub request: Value,
    pub execute: ExecuteLevel,
    /// Optional JSON Schema every request must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<Value>,
    /// Name of the external tool client that serves this call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl ActionToolItem {
    pub fn takes_arguments(&self) -> bool {
        !self.request.is_null()
    }
}
