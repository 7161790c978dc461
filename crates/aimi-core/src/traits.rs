//! Collaborator traits at the edge of the Aimi core.
//!
//! These four traits are the only way the core reaches the outside world:
//!
//! - `OperatorSink`: delivers text to the human operator
//! - `SandboxRunner`: runs model-written code in isolation
//! - `ToolClient`: answers queries for one external tool
//! - `BatchRepairer`: turns a buffered, possibly malformed response into records
//!
//! The core never retries a collaborator. Failures are reported back to the
//! model as error-result records so it can correct itself on the next turn.

use serde_json::Value;

use aimi_contracts::{
    action::ActionRecord,
    error::AimiResult,
    registry::ActionRegistry,
    render::SandboxOutcome,
};

/// Where text addressed to the operator goes (a messaging gateway, a web
/// relay, a terminal).
pub trait OperatorSink: Send + Sync {
    /// Deliver one complete message.
    ///
    /// Called once per `chat_to_operator` record, when its content is
    /// complete. Live partial text is rendered separately and never reaches
    /// the sink.
    fn deliver(&self, text: &str) -> AimiResult<()>;
}

/// Runs code in an isolated environment.
pub trait SandboxRunner: Send + Sync {
    /// Run `code` to completion and report what happened.
    ///
    /// A non-zero exit status is a normal outcome, not an error. Return
    /// `Err` only when the sandbox itself could not run.
    fn run(&self, code: &str) -> AimiResult<SandboxOutcome>;
}

/// What a tool client answers with.
pub enum ToolReply {
    /// The whole answer at once.
    Text(String),
    /// An answer that arrives piece by piece. The core renders each piece
    /// as it is pulled.
    Stream(Box<dyn Iterator<Item = AimiResult<String>> + Send>),
}

impl std::fmt::Debug for ToolReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A black-box external tool: a math engine, a search-capable assistant,
/// a clock.
pub trait ToolClient: Send + Sync {
    /// Answer `request`, the record's request payload. No-argument actions
    /// pass `Value::Null`.
    fn query(&self, request: &Value) -> AimiResult<ToolReply>;
}

/// Decodes one fully buffered block of model output into records.
///
/// The outer `Err` means nothing usable could be recovered (the whole batch
/// failed). Inner `Err`s reject single elements while their siblings are
/// still dispatched.
pub trait BatchRepairer: Send + Sync {
    fn decode(
        &self,
        text: &str,
        registry: &ActionRegistry,
    ) -> AimiResult<Vec<AimiResult<ActionRecord>>>;
}
