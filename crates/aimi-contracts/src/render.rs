//! Renderable output and side-effect outcome types.
//!
//! Both interpretation paths produce a sequence of `RenderFragment`s. The
//! surrounding conversational loop decides how to show them; the `kind`
//! tag tells it what each piece of text is.

use serde::{Deserialize, Serialize};

use crate::error::AimiError;

/// Text of the sentinel that asks the conversational loop to prompt again.
pub const CONTINUE_SENTINEL: &str = "[continue]";

/// What a fragment of rendered text represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// The model's reasoning, streamed as it arrives.
    Reasoning,
    /// Text addressed to the operator.
    Operator,
    /// Source code about to be run in the sandbox.
    Code,
    /// Output of a sandbox run.
    CodeOutput,
    /// Output of an external tool.
    ToolOutput,
    /// A note being stored.
    Note,
    /// Free-form analysis or supposition.
    Analysis,
    /// A task lifecycle change.
    Task,
    /// A short error report.
    Diagnostic,
    /// The continue sentinel.
    Continue,
}

/// One piece of rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderFragment {
    pub kind: FragmentKind,
    pub text: String,
}

impl RenderFragment {
    pub fn new(kind: FragmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn diagnostic(error: &AimiError) -> Self {
        Self::new(FragmentKind::Diagnostic, error.to_string())
    }

    pub fn continue_token() -> Self {
        Self::new(FragmentKind::Continue, CONTINUE_SENTINEL)
    }

    pub fn is_continue(&self) -> bool {
        self.kind == FragmentKind::Continue
    }
}

/// What the sandbox reports back for one code run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl SandboxOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}
