//! Runtime error types for the Aimi action protocol.
//!
//! All fallible operations across the workspace return `AimiResult<T>`.
//! Variants carry enough context to be logged and rendered back to the
//! model as a diagnostic so it can correct itself on the next turn.

use thiserror::Error;

/// The unified error type for the Aimi runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AimiError {
    /// The streamed text could not be parsed as a value at all.
    ///
    /// Fatal to the current response: parsing stops and no recovery is attempted.
    #[error("structural parse error at {path}: {reason}")]
    StructuralParse { path: String, reason: String },

    /// The model asked for a call that is not in the registry.
    #[error("call '{call}' is not in the allow-list")]
    DisallowedCall { call: String },

    /// A record reused a logical moment that has already been superseded.
    #[error("timestamp {timestamp} of '{call}' is older than the logical clock {clock}")]
    StaleTimestamp { call: String, timestamp: u64, clock: u64 },

    /// More than one record in a single response resolved to `system`.
    #[error("call '{call}' is a second system-level record in the same response")]
    DuplicateSystemCall { call: String },

    /// The model tried to author a message that only the operator (or the
    /// runtime on the operator's behalf) may author.
    #[error("call '{call}' fabricates a message the operator did not send")]
    FabricatedOperatorMessage { call: String },

    /// Parsing finished but the response never resolved to an executable turn.
    #[error("response is unresolved: {reason}")]
    UnresolvedResponse { reason: String },

    /// Tolerant repair could not recover a decodable batch.
    #[error("repair failed: {reason}")]
    RepairFailure { reason: String, original: String },

    /// A request payload did not have the shape its action requires.
    #[error("request of '{call}' has the wrong shape: {reason}")]
    RequestShape { call: String, reason: String },

    /// A dispatched action's side effect failed.
    ///
    /// Never propagated to the caller: converted into a synthesized
    /// error-result record in the log.
    #[error("action '{call}' failed: {reason}")]
    ActionExecution { call: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The persistence collaborator could not load or save state.
    #[error("persistence error: {reason}")]
    Persistence { reason: String },
}

impl AimiError {
    /// True for errors that end interpretation of the whole response.
    ///
    /// Per-record errors (stale timestamp, duplicate system call, shape
    /// mismatch, fabrication) only drop the offending record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AimiError::StructuralParse { .. }
                | AimiError::DisallowedCall { .. }
                | AimiError::UnresolvedResponse { .. }
                | AimiError::RepairFailure { .. }
        )
    }
}

/// Convenience alias used throughout the Aimi crates.
pub type AimiResult<T> = Result<T, AimiError>;
