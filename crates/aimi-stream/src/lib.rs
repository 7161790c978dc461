//! # aimi-stream
//!
//! Incremental, path-addressed parser for model output that arrives a few
//! characters at a time.
//!
//! A [`ParserCursor`] accepts text fragments in order and, for each one,
//! lazily yields [`NodeUpdate`]s: containers as they open, partial text of
//! strings and literals as it arrives, and every value at the moment it
//! completes. Each node is addressed by a path such as
//! `root[0]["request"]["content"]`, so callers can react to one field
//! without waiting for the rest of the document.
//!
//! Splitting the same input at any set of boundaries produces the same set
//! of completed nodes with the same values.

pub mod cursor;
pub mod error;
pub mod node;

pub use cursor::{Feed, NodeUpdate, ParserCursor, ROOT_PATH};
pub use error::StreamError;
pub use node::{NodeId, NodeKind, Segment, StreamNode};
