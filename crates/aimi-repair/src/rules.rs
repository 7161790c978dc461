//! Text repair rules.
//!
//! Each rule is a pure `text -> Option<text>` function. `None` means the
//! rule does not apply; `Some` carries the rewritten text. Rules never
//! validate their output; the pipeline re-parses after every rewrite.

/// A single text repair heuristic.
pub type RepairRule = fn(&str) -> Option<String>;

/// The rules in the order the pipeline tries them.
pub const DEFAULT_RULES: &[(&str, RepairRule)] = &[
    ("strip_code_fence", strip_code_fence),
    ("wrap_single_object", wrap_single_object),
    ("slice_outer_array", slice_outer_array),
    ("unescape_doubled_quotes", unescape_doubled_quotes),
];

const FENCE: &str = "```";

/// Keep only the body of the first fenced code block.
///
/// The info string after the opening fence (`json`, `python`) is dropped
/// with the rest of that line. An unclosed fence keeps everything after it.
pub fn strip_code_fence(text: &str) -> Option<String> {
    let open = text.find(FENCE)?;
    let after_open = &text[open + FENCE.len()..];
    let body_start = after_open.find('\n').map_or(after_open.len(), |i| i + 1);
    let body = &after_open[body_start..];
    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    Some(body.trim().to_string())
}

/// Wrap a lone object in a one-element array.
pub fn wrap_single_object(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}')).then(|| format!("[{trimmed}]"))
}

/// Slice from the first `[` to the last `]`, dropping commentary around it.
pub fn slice_outer_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let sliced = &text[start..=end];
    (sliced != text.trim()).then(|| sliced.to_string())
}

/// Undo one level of quote escaping.
///
/// Models sometimes emit the array as an escaped string literal, either
/// quoted (`"[{\"call\": ...}]"`) or bare (`[{\"call\": ...}]`).
pub fn unescape_doubled_quotes(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
            return Some(inner);
        }
    }
    trimmed
        .contains("\\\"")
        .then(|| trimmed.replace("\\\\", "\\").replace("\\\"", "\""))
}
