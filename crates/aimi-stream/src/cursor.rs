//! The resumable parser cursor.
//!
//! `ParserCursor` owns the append-only input buffer, the node arena and an
//! explicit stack of open frames. Feeding a fragment never rescans consumed
//! input: the frame stack and per-string escape state are exactly what is
//! needed to resume at the next character.

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::node::{NodeId, NodeKind, Segment, StreamNode};

/// Address of the root value.
pub const ROOT_PATH: &str = "root";

/// One observation about a node, produced while feeding a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub id: NodeId,
    pub kind: NodeKind,
    pub path: String,
    /// Structural address from the root, recomputed from parent links.
    pub address: Vec<Segment>,
    pub complete: bool,
    /// Newly decoded text since the previous report for this node.
    pub chunk: String,
    /// The assembled value, present once the node is complete.
    pub value: Option<Value>,
    /// True on the last update produced for the current fragment.
    pub final_for_feed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    Backslash,
    Unicode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    ValueOrEnd,
    AfterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    KeyOrEnd,
    Key,
    Colon,
    Value,
    AfterValue,
}

#[derive(Debug, Clone)]
enum Frame {
    Array {
        id: NodeId,
        state: ArrayState,
        next_index: usize,
    },
    Object {
        id: NodeId,
        state: ObjectState,
        key: String,
        escape: Escape,
    },
    Str {
        id: NodeId,
        escape: Escape,
    },
    Literal {
        id: NodeId,
    },
}

impl Frame {
    fn node(&self) -> NodeId {
        match self {
            Self::Array { id, .. }
            | Self::Object { id, .. }
            | Self::Str { id, .. }
            | Self::Literal { id } => *id,
        }
    }
}

/// Incremental, resumable parser over a growing JSON text.
#[derive(Debug, Clone)]
pub struct ParserCursor {
    nodes: Vec<StreamNode>,
    index: HashMap<String, NodeId>,
    buffer: String,
    offset: usize,
    stack: Vec<Frame>,
    done: bool,
    failure: Option<StreamError>,
    /// Updates parsed but not yet yielded. A dropped `Feed` leaves them
    /// here for the next one.
    held: VecDeque<NodeUpdate>,
    /// The failure, until some `Feed` has yielded it.
    unreported: Option<StreamError>,
}

impl Default for ParserCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserCursor {
    pub fn new() -> Self {
        let root = StreamNode::new(ROOT_PATH.to_string(), None, None);
        let mut index = HashMap::new();
        index.insert(ROOT_PATH.to_string(), NodeId(0));
        Self {
            nodes: vec![root],
            index,
            buffer: String::new(),
            offset: 0,
            stack: Vec::new(),
            done: false,
            failure: None,
            held: VecDeque::new(),
            unreported: None,
        }
    }

    /// Append `fragment` and return a lazy iterator over the updates it
    /// produces. Input is consumed only as the iterator is advanced.
    ///
    /// Dropping the iterator early loses nothing: updates it parsed but did
    /// not yield come first from the next `feed`.
    pub fn feed(&mut self, fragment: &str) -> Feed<'_> {
        self.buffer.push_str(fragment);
        Feed {
            cursor: self,
            exhausted: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &StreamNode {
        &self.nodes[id.0]
    }

    pub fn lookup(&self, path: &str) -> Option<&StreamNode> {
        self.index.get(path).map(|id| &self.nodes[id.0])
    }

    pub fn lookup_id(&self, path: &str) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    /// Recompute a node's structural address by walking parent links.
    pub fn address(&self, id: NodeId) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if let Some(segment) = &node.segment {
                segments.push(segment.clone());
            }
            current = node.parent;
        }
        segments.reverse();
        segments
    }

    /// The value assembled so far under `id`. Incomplete scalars read as
    /// their partial text (strings) or null (literals).
    pub fn value(&self, id: NodeId) -> Value {
        let node = &self.nodes[id.0];
        match node.kind {
            NodeKind::Array => Value::Array(
                node.children
                    .iter()
                    .map(|(_, child)| self.value(*child))
                    .collect(),
            ),
            NodeKind::Object => {
                let mut map = Map::new();
                for (segment, child) in &node.children {
                    if let Segment::Key(key) = segment {
                        map.insert(key.clone(), self.value(*child));
                    }
                }
                Value::Object(map)
            }
            NodeKind::String => Value::String(node.text.clone()),
            NodeKind::Number | NodeKind::Boolean | NodeKind::Null => {
                node.scalar.clone().unwrap_or(Value::Null)
            }
            NodeKind::Pending => Value::Null,
        }
    }

    pub fn value_at(&self, path: &str) -> Option<Value> {
        self.lookup_id(path).map(|id| self.value(id))
    }

    /// Address of the innermost value currently being parsed.
    pub fn current_path(&self) -> &str {
        self.stack
            .last()
            .map(|frame| self.nodes[frame.node().0].path.as_str())
            .unwrap_or(ROOT_PATH)
    }

    /// Bytes of the buffer consumed so far. Never decreases.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True once the root value has completed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn failure(&self) -> Option<&StreamError> {
        self.failure.as_ref()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn next_char(&mut self) -> Option<char> {
        let ch = self.buffer[self.offset..].chars().next()?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    fn unexpected(&self, found: char) -> StreamError {
        StreamError::UnexpectedToken {
            found,
            offset: self.offset.saturating_sub(found.len_utf8()),
            path: self.current_path().to_string(),
        }
    }

    fn add_child(&mut self, parent: NodeId, segment: Segment) -> NodeId {
        let path = format!("{}{}", self.nodes[parent.0].path, segment);
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(StreamNode::new(path.clone(), Some(parent), Some(segment.clone())));

        // A repeated key replaces the earlier value.
        let children = &mut self.nodes[parent.0].children;
        match children.iter().position(|(s, _)| *s == segment) {
            Some(pos) => children[pos].1 = id,
            None => children.push((segment, id)),
        }
        self.index.insert(path, id);
        id
    }

    fn update_for(&self, id: NodeId, chunk: String) -> NodeUpdate {
        let node = &self.nodes[id.0];
        NodeUpdate {
            id,
            kind: node.kind,
            path: node.path.clone(),
            address: self.address(id),
            complete: node.complete,
            chunk,
            value: node.complete.then(|| self.value(id)),
            final_for_feed: false,
        }
    }

    fn open_value(
        &mut self,
        id: NodeId,
        ch: char,
        out: &mut VecDeque<NodeUpdate>,
    ) -> Result<(), StreamError> {
        let Some(kind) = NodeKind::from_lookahead(ch) else {
            return Err(self.unexpected(ch));
        };
        self.nodes[id.0].kind = kind;
        match kind {
            NodeKind::Array => {
                self.stack.push(Frame::Array {
                    id,
                    state: ArrayState::ValueOrEnd,
                    next_index: 0,
                });
                out.push_back(self.update_for(id, String::new()));
            }
            NodeKind::Object => {
                self.stack.push(Frame::Object {
                    id,
                    state: ObjectState::KeyOrEnd,
                    key: String::new(),
                    escape: Escape::None,
                });
                out.push_back(self.update_for(id, String::new()));
            }
            NodeKind::String => self.stack.push(Frame::Str {
                id,
                escape: Escape::None,
            }),
            _ => {
                let node = &mut self.nodes[id.0];
                node.text.push(ch);
                node.pending.push(ch);
                self.stack.push(Frame::Literal { id });
            }
        }
        Ok(())
    }

    fn complete(&mut self, id: NodeId, out: &mut VecDeque<NodeUpdate>) {
        let node = &mut self.nodes[id.0];
        node.complete = true;
        let chunk = std::mem::take(&mut node.pending);
        node.chunk = chunk.clone();
        out.push_back(self.update_for(id, chunk));
        if id == self.root() {
            debug!(offset = self.offset, "root value complete");
            self.done = true;
        }
    }

    fn finish_literal(&mut self, id: NodeId) -> Result<(), StreamError> {
        let node = &self.nodes[id.0];
        let scalar = match node.kind {
            NodeKind::Boolean => match node.text.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            NodeKind::Null => (node.text == "null").then_some(Value::Null),
            _ => serde_json::from_str::<Value>(&node.text)
                .ok()
                .filter(Value::is_number),
        };
        match scalar {
            Some(value) => {
                self.nodes[id.0].scalar = Some(value);
                Ok(())
            }
            None => Err(StreamError::MalformedLiteral {
                text: node.text.clone(),
                path: node.path.clone(),
            }),
        }
    }

    fn extend_literal(&mut self, id: NodeId, ch: char) -> Result<(), StreamError> {
        let node = &mut self.nodes[id.0];
        node.text.push(ch);
        let plausible = match node.kind {
            NodeKind::Boolean => "true".starts_with(&node.text) || "false".starts_with(&node.text),
            NodeKind::Null => "null".starts_with(&node.text),
            _ => matches!(ch, '0'..='9' | '-' | '+' | '.' | 'e' | 'E'),
        };
        if !plausible {
            return Err(StreamError::MalformedLiteral {
                text: node.text.clone(),
                path: node.path.clone(),
            });
        }
        node.pending.push(ch);
        Ok(())
    }

    /// Consume one character.
    fn step(&mut self, ch: char, out: &mut VecDeque<NodeUpdate>) -> Result<(), StreamError> {
        loop {
            let Some(mut frame) = self.stack.pop() else {
                if self.done || ch.is_whitespace() {
                    return Ok(());
                }
                let root = self.root();
                return self.open_value(root, ch, out);
            };

            match &mut frame {
                Frame::Str { id, escape } => {
                    let id = *id;
                    let mut decoded = String::new();
                    let closed = decode_string_char(escape, ch, &mut decoded);
                    let node = &mut self.nodes[id.0];
                    node.text.push_str(&decoded);
                    node.pending.push_str(&decoded);
                    if closed {
                        self.complete(id, out);
                    } else {
                        self.stack.push(frame);
                    }
                    return Ok(());
                }

                Frame::Literal { id } => {
                    let id = *id;
                    if is_delimiter(ch) {
                        self.finish_literal(id)?;
                        self.complete(id, out);
                        if ch.is_whitespace() {
                            return Ok(());
                        }
                        // The delimiter belongs to the enclosing container.
                        continue;
                    }
                    self.stack.push(frame);
                    return self.extend_literal(id, ch);
                }

                Frame::Array {
                    id,
                    state,
                    next_index,
                } => {
                    let id = *id;
                    match (*state, ch) {
                        (_, c) if c.is_whitespace() => {}
                        (_, ']') => {
                            self.complete(id, out);
                            return Ok(());
                        }
                        (ArrayState::AfterValue, ',') => *state = ArrayState::ValueOrEnd,
                        (ArrayState::ValueOrEnd, c) => {
                            let segment = Segment::Index(*next_index);
                            *next_index += 1;
                            *state = ArrayState::AfterValue;
                            self.stack.push(frame);
                            let child = self.add_child(id, segment);
                            return self.open_value(child, c, out);
                        }
                        (ArrayState::AfterValue, c) => {
                            self.stack.push(frame);
                            return Err(self.unexpected(c));
                        }
                    }
                    self.stack.push(frame);
                    return Ok(());
                }

                Frame::Object {
                    id,
                    state,
                    key,
                    escape,
                } => {
                    let id = *id;
                    match *state {
                        ObjectState::Key => {
                            if decode_string_char(escape, ch, key) {
                                *state = ObjectState::Colon;
                            }
                        }
                        _ if ch.is_whitespace() => {}
                        ObjectState::KeyOrEnd | ObjectState::AfterValue if ch == '}' => {
                            self.complete(id, out);
                            return Ok(());
                        }
                        ObjectState::KeyOrEnd if ch == '"' => {
                            key.clear();
                            *escape = Escape::None;
                            *state = ObjectState::Key;
                        }
                        ObjectState::Colon if ch == ':' => *state = ObjectState::Value,
                        ObjectState::AfterValue if ch == ',' => *state = ObjectState::KeyOrEnd,
                        ObjectState::Value => {
                            let segment = Segment::Key(std::mem::take(key));
                            *state = ObjectState::AfterValue;
                            self.stack.push(frame);
                            let child = self.add_child(id, segment);
                            return self.open_value(child, ch, out);
                        }
                        _ => {
                            self.stack.push(frame);
                            return Err(self.unexpected(ch));
                        }
                    }
                    self.stack.push(frame);
                    return Ok(());
                }
            }
        }
    }

    /// Report text accumulated by an open string or literal since its last
    /// report. Called when a fragment is exhausted.
    fn flush_partial(&mut self, out: &mut VecDeque<NodeUpdate>) {
        let Some(id) = self.stack.last().and_then(|frame| match frame {
            Frame::Str { id, .. } | Frame::Literal { id } => Some(*id),
            _ => None,
        }) else {
            return;
        };
        let node = &mut self.nodes[id.0];
        if node.pending.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut node.pending);
        node.chunk = chunk.clone();
        out.push_back(self.update_for(id, chunk));
    }
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, ',' | ']' | '}') || ch.is_whitespace()
}

/// Decode one character of a string body into `out`. Returns true when the
/// closing quote is reached. Escape state carries across fragment
/// boundaries, so a backslash at the end of one fragment applies to the
/// first character of the next.
fn decode_string_char(escape: &mut Escape, ch: char, out: &mut String) -> bool {
    match std::mem::take(escape) {
        Escape::None => match ch {
            '"' => return true,
            '\\' => *escape = Escape::Backslash,
            c => out.push(c),
        },
        Escape::Backslash => match ch {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => *escape = Escape::Unicode(String::new()),
            other => {
                out.push('\\');
                out.push(other);
            }
        },
        Escape::Unicode(mut digits) => {
            if ch.is_ascii_hexdigit() {
                digits.push(ch);
                if digits.len() == 4 {
                    let decoded = u32::from_str_radix(&digits, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    out.push(decoded);
                } else {
                    *escape = Escape::Unicode(digits);
                }
            } else {
                out.push(char::REPLACEMENT_CHARACTER);
                return decode_string_char(escape, ch, out);
            }
        }
    }
    false
}

/// Lazy iterator over the updates produced by one fragment.
///
/// One update is held back until the next one is produced so the last
/// update of the fragment can be flagged `final_for_feed`.
pub struct Feed<'a> {
    cursor: &'a mut ParserCursor,
    exhausted: bool,
}

impl Feed<'_> {
    /// The cursor this feed advances. Useful for looking up parents while
    /// handling an update.
    pub fn cursor(&self) -> &ParserCursor {
        self.cursor
    }
}

impl Iterator for Feed<'_> {
    type Item = Result<NodeUpdate, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let held = &mut self.cursor.held;
            if held.len() > 1 || (self.exhausted && !held.is_empty()) {
                let mut update = held.pop_front()?;
                if self.exhausted && held.is_empty() && self.cursor.unreported.is_none() {
                    update.final_for_feed = true;
                }
                return Some(Ok(update));
            }
            if self.exhausted {
                return self.cursor.unreported.take().map(Err);
            }
            if self.cursor.failure.is_some() {
                self.exhausted = true;
                continue;
            }
            if self.cursor.done {
                let rest = &self.cursor.buffer[self.cursor.offset..];
                if !rest.trim().is_empty() {
                    warn!(ignored = rest.len(), "input after the root value ignored");
                }
                self.cursor.offset = self.cursor.buffer.len();
                self.exhausted = true;
                continue;
            }
            let mut held = std::mem::take(&mut self.cursor.held);
            match self.cursor.next_char() {
                Some(ch) => {
                    if let Err(err) = self.cursor.step(ch, &mut held) {
                        debug!(error = %err, path = err.path(), "structural parse failure");
                        self.cursor.failure = Some(err.clone());
                        self.cursor.unreported = Some(err);
                        self.exhausted = true;
                    }
                }
                None => {
                    self.cursor.flush_partial(&mut held);
                    self.exhausted = true;
                }
            }
            self.cursor.held = held;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    const SAMPLE: &str = r#"[{"timestamp": 3, "call": "chat_to_operator", "request": {"content": "line\nnext \"quoted\" \\ done é"}, "execute": "system"}, {"call":"analysis","request":{"n":[1, -2.5e3, true, false, null],"deep":{}},}]"#;

    /// Feed every fragment and return path → value of every completed node.
    fn completed(fragments: &[&str]) -> BTreeMap<String, Value> {
        let mut cursor = ParserCursor::new();
        let mut out = BTreeMap::new();
        for fragment in fragments {
            for update in cursor.feed(fragment) {
                let update = update.unwrap();
                if update.complete {
                    assert!(
                        out.insert(update.path.clone(), update.value.unwrap()).is_none(),
                        "{} completed twice",
                        update.path
                    );
                }
            }
        }
        out
    }

    fn split_at_char(text: &str, at: usize) -> (&str, &str) {
        let byte = text.char_indices().nth(at).map(|(b, _)| b).unwrap_or(text.len());
        text.split_at(byte)
    }

    // ── Resumability ─────────────────────────────────────────────────────────

    #[test]
    fn any_two_way_split_matches_whole_feed() {
        let whole = completed(&[SAMPLE]);
        assert_eq!(whole["root"], serde_json::from_str::<Value>(
            &SAMPLE.replace(",}]", "}]")
        ).unwrap());

        for at in 0..=SAMPLE.chars().count() {
            let (a, b) = split_at_char(SAMPLE, at);
            assert_eq!(completed(&[a, b]), whole, "split at {at}");
        }
    }

    #[test]
    fn char_by_char_matches_whole_feed() {
        let chars: Vec<String> = SAMPLE.chars().map(String::from).collect();
        let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(completed(&fragments), completed(&[SAMPLE]));
    }

    #[test]
    fn escaped_backslash_split_between_backslashes() {
        let text = r#"["a\\b"]"#;
        for at in 0..=text.len() {
            let (a, b) = text.split_at(at);
            let done = completed(&[a, b]);
            assert_eq!(done["root[0]"], json!("a\\b"), "split at {at}");
        }
    }

    #[test]
    fn unicode_escape_split_midway() {
        let done = completed(&[r#"["\u00"#, r#"e9!"]"#]);
        assert_eq!(done["root[0]"], json!("é!"));
    }

    #[test]
    fn number_split_across_fragments() {
        let done = completed(&["[12", "34, 5]"]);
        assert_eq!(done["root[0]"], json!(1234));
        assert_eq!(done["root"], json!([1234, 5]));
    }

    // ── Progress reporting ───────────────────────────────────────────────────

    #[test]
    fn partial_string_reports_chunk_then_completion() {
        let mut cursor = ParserCursor::new();
        let first: Vec<NodeUpdate> = cursor
            .feed("[{\"call\":\"")
            .map(Result::unwrap)
            .collect();
        assert!(first.iter().all(|u| !u.complete));

        let second: Vec<NodeUpdate> = cursor
            .feed("chat_to_operator\",\"request\":{\"content\":\"hi")
            .map(Result::unwrap)
            .collect();
        let call = second.iter().find(|u| u.path == "root[0][\"call\"]").unwrap();
        assert!(call.complete);
        assert_eq!(call.value, Some(json!("chat_to_operator")));

        let last = second.last().unwrap();
        assert!(last.final_for_feed);
        assert_eq!(last.path, "root[0][\"request\"][\"content\"]");
        assert_eq!(last.chunk, "hi");
        assert!(!last.complete);

        let third: Vec<NodeUpdate> = cursor.feed("\"}}]").map(Result::unwrap).collect();
        let content = &third[0];
        assert!(content.complete);
        assert_eq!(content.chunk, "");
        assert_eq!(content.value, Some(json!("hi")));
        assert_eq!(third.last().unwrap().path, "root");
        assert!(cursor.is_done());
    }

    #[test]
    fn chunks_concatenate_to_the_full_string() {
        let mut cursor = ParserCursor::new();
        let mut text = String::new();
        for fragment in ["[\"ab", "c\\", "nd", "e\"]"] {
            for update in cursor.feed(fragment) {
                let update = update.unwrap();
                if update.path == "root[0]" {
                    text.push_str(&update.chunk);
                }
            }
        }
        assert_eq!(text, "abc\nde");
    }

    #[test]
    fn completion_is_monotonic_and_offset_never_decreases() {
        let mut cursor = ParserCursor::new();
        let mut seen_complete: Vec<String> = Vec::new();
        let mut last_offset = 0;
        for ch in SAMPLE.chars() {
            let updates: Vec<NodeUpdate> =
                cursor.feed(&ch.to_string()).map(Result::unwrap).collect();
            assert!(cursor.offset() >= last_offset);
            last_offset = cursor.offset();
            for path in &seen_complete {
                assert!(cursor.lookup(path.as_str()).unwrap().is_complete());
            }
            for update in updates.into_iter().filter(|u| u.complete) {
                assert!(!seen_complete.contains(&update.path));
                seen_complete.push(update.path);
            }
        }
        assert_eq!(cursor.offset(), SAMPLE.len());
    }

    #[test]
    fn dropped_feed_hands_its_updates_to_the_next() {
        let strip = |u: &NodeUpdate| (u.path.clone(), u.complete, u.chunk.clone(), u.value.clone());

        let whole: Vec<NodeUpdate> = ParserCursor::new().feed(SAMPLE).map(Result::unwrap).collect();
        let mut cursor = ParserCursor::new();
        let mut seen: Vec<NodeUpdate> = cursor.feed(SAMPLE).take(3).map(Result::unwrap).collect();
        seen.extend(cursor.feed("").map(Result::unwrap));
        assert_eq!(
            seen.iter().map(strip).collect::<Vec<_>>(),
            whole.iter().map(strip).collect::<Vec<_>>()
        );

        let mut cursor = ParserCursor::new();
        assert_eq!(cursor.feed("[1, @]").take(1).count(), 1);
        let rest: Vec<_> = cursor.feed("").collect();
        assert!(rest.last().is_some_and(Result::is_err));
    }

    #[test]
    fn address_matches_path() {
        let mut cursor = ParserCursor::new();
        cursor.feed(r#"[{"request": {"a": [0, {"b": 1}]}}]"#).for_each(drop);
        let id = cursor.lookup_id("root[0][\"request\"][\"a\"][1][\"b\"]").unwrap();
        assert_eq!(
            cursor.address(id),
            vec![
                Segment::Index(0),
                Segment::Key("request".into()),
                Segment::Key("a".into()),
                Segment::Index(1),
                Segment::Key("b".into()),
            ]
        );
        let rebuilt: String = cursor.address(id).iter().map(|s| s.to_string()).collect();
        assert_eq!(format!("{ROOT_PATH}{rebuilt}"), cursor.node(id).path());
    }

    // ── Grammar edges ────────────────────────────────────────────────────────

    #[test]
    fn trailing_commas_and_empty_containers() {
        let done = completed(&["[ {}, [], {\"a\": 1,}, ]"]);
        assert_eq!(done["root"], json!([{}, [], {"a": 1}]));
    }

    #[test]
    fn duplicate_key_last_wins() {
        let mut cursor = ParserCursor::new();
        assert!(cursor.feed(r#"{"a": 1, "a": 2}"#).all(|u| u.is_ok()));
        assert_eq!(cursor.value(cursor.root()), json!({"a": 2}));
        assert_eq!(cursor.value_at("root[\"a\"]"), Some(json!(2)));
    }

    #[test]
    fn input_after_root_is_ignored() {
        let mut cursor = ParserCursor::new();
        let updates: Vec<_> = cursor.feed("[1] trailing [2]").collect();
        assert!(updates.iter().all(Result::is_ok));
        assert!(cursor.is_done());
        assert_eq!(cursor.value(cursor.root()), json!([1]));
        assert_eq!(cursor.feed("more").count(), 0);
    }

    #[test]
    fn unexpected_token_poisons_cursor() {
        let mut cursor = ParserCursor::new();
        let results: Vec<_> = cursor.feed("[1 2]").collect();
        let err = results.last().unwrap().clone().unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedToken { found: '2', .. }));
        assert_eq!(err.path(), "root");
        assert!(cursor.failure().is_some());
        assert_eq!(cursor.feed("]").count(), 0);
    }

    #[test]
    fn malformed_literals_are_reported() {
        let mut cursor = ParserCursor::new();
        let err = cursor
            .feed("[nulx]")
            .find_map(Result::err)
            .unwrap();
        assert!(matches!(err, StreamError::MalformedLiteral { .. }));

        let mut cursor = ParserCursor::new();
        let err = cursor.feed("[tru]").find_map(Result::err).unwrap();
        assert_eq!(
            err,
            StreamError::MalformedLiteral {
                text: "tru".into(),
                path: "root[0]".into()
            }
        );
    }

    #[test]
    fn feed_is_lazy() {
        let mut cursor = ParserCursor::new();
        let mut feed = cursor.feed("[1, 2, 3]");
        let first = feed.next().unwrap().unwrap();
        assert_eq!(first.path, "root");
        drop(feed);
        assert!(cursor.offset() < "[1, 2, 3]".len());
    }
}
