//! Structural parse errors.

use thiserror::Error;

/// A structural failure. The parser performs no recovery: once one is
/// reported the cursor yields nothing further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A character that cannot appear where it was found.
    #[error("unexpected {found:?} at offset {offset}")]
    UnexpectedToken {
        found: char,
        offset: usize,
        path: String,
    },

    /// A number, boolean or null literal that is not well formed.
    #[error("malformed literal '{text}'")]
    MalformedLiteral { text: String, path: String },
}

impl StreamError {
    /// The address of the node being parsed when the failure happened.
    pub fn path(&self) -> &str {
        match self {
            Self::UnexpectedToken { path, .. } | Self::MalformedLiteral { path, .. } => path,
        }
    }
}
