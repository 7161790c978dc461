//! Value nodes and structural addresses.
//!
//! Nodes live in an arena owned by the `ParserCursor`. A container owns its
//! children through the arena indices it stores; the `parent` index is a
//! non-owning back-reference used only to recompute addresses.

use std::fmt;

use serde_json::Value;

/// Index of a node in the cursor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The type of a parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Array,
    Object,
    String,
    Number,
    Boolean,
    Null,
    /// Created but not yet typed: no significant character has been seen.
    Pending,
}

impl NodeKind {
    /// Decide the type of a value from its first significant character.
    pub fn from_lookahead(ch: char) -> Option<Self> {
        match ch {
            '{' => Some(Self::Object),
            '[' => Some(Self::Array),
            '"' => Some(Self::String),
            't' | 'f' => Some(Self::Boolean),
            'n' => Some(Self::Null),
            '-' | '0'..='9' => Some(Self::Number),
            _ => None,
        }
    }
}

/// One step of a structural address: an object key or an array position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::Index(_) => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "[\"{k}\"]"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// One parsed value.
///
/// `complete` only ever moves from false to true. Strings accumulate their
/// unescaped text; numbers, booleans and null accumulate their raw literal
/// until a delimiter ends them.
#[derive(Debug, Clone)]
pub struct StreamNode {
    pub(crate) kind: NodeKind,
    pub(crate) path: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) segment: Option<Segment>,
    pub(crate) complete: bool,
    pub(crate) children: Vec<(Segment, NodeId)>,
    pub(crate) text: String,
    /// The chunk most recently reported to the caller.
    pub(crate) chunk: String,
    /// Text appended since the last report.
    pub(crate) pending: String,
    pub(crate) scalar: Option<Value>,
}

impl StreamNode {
    pub(crate) fn new(path: String, parent: Option<NodeId>, segment: Option<Segment>) -> Self {
        Self {
            kind: NodeKind::Pending,
            path,
            parent,
            segment,
            complete: false,
            children: Vec::new(),
            text: String::new(),
            chunk: String::new(),
            pending: String::new(),
            scalar: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The fragment most recently reported for live rendering.
    pub fn chunk(&self) -> &str {
        &self.chunk
    }

    /// Text assembled so far (unescaped for strings, raw for literals).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Children in the order they were first seen.
    pub fn children(&self) -> impl Iterator<Item = (&Segment, NodeId)> {
        self.children.iter().map(|(s, id)| (s, *id))
    }

    pub fn child(&self, segment: &Segment) -> Option<NodeId> {
        self.children
            .iter()
            .find(|(s, _)| s == segment)
            .map(|(_, id)| *id)
    }
}
