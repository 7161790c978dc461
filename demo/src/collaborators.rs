//! Local stand-ins for the external collaborators.

use std::io::Write;
use std::process::Command;
use std::time::Instant;

use chrono::Local;
use serde_json::Value;
use tracing::debug;

use aimi_contracts::{
    error::{AimiError, AimiResult},
    render::SandboxOutcome,
};
use aimi_core::{Collaborators, OperatorSink, SandboxRunner, ToolClient, ToolReply};

/// Prints operator messages to stdout.
struct StdoutSink;

impl OperatorSink for StdoutSink {
    fn deliver(&self, text: &str) -> AimiResult<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "\n── delivered to operator ──\n{text}").map_err(|e| {
            AimiError::ActionExecution {
                call: "chat_to_operator".to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Runs code with the local `python3` interpreter.
///
/// This is not an isolated sandbox. It exists so the demo can show the
/// `chat_from_python` follow-up end to end.
struct PythonProcess {
    program: String,
}

impl SandboxRunner for PythonProcess {
    fn run(&self, code: &str) -> AimiResult<SandboxOutcome> {
        let started = Instant::now();
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(code)
            .output()
            .map_err(|e| AimiError::ActionExecution {
                call: "chat_to_python".to_string(),
                reason: format!("failed to start {}: {e}", self.program),
            })?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(program = %self.program, elapsed_ms, "python process finished");

        Ok(SandboxOutcome {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed_ms,
        })
    }
}

/// Answers with the local date and time.
struct SystemTime;

impl ToolClient for SystemTime {
    fn query(&self, _request: &Value) -> AimiResult<ToolReply> {
        Ok(ToolReply::Text(Local::now().format("%Y-%m-%d %H:%M:%S %:z").to_string()))
    }
}

/// Echoes the question back word by word, standing in for a search tool.
struct Echo {
    name: &'static str,
}

impl ToolClient for Echo {
    fn query(&self, request: &Value) -> AimiResult<ToolReply> {
        let question = request
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let answer = format!("[{}] you asked: {question}", self.name);
        let pieces: Vec<AimiResult<String>> = answer
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(ToolReply::Stream(Box::new(pieces.into_iter())))
    }
}

/// Wire every collaborator the built-in registry refers to.
pub fn local(python: &str) -> Collaborators {
    let mut collaborators = Collaborators::new(
        Box::new(StdoutSink),
        Box::new(PythonProcess {
            program: python.to_string(),
        }),
    )
    .with_tool("system_time", Box::new(SystemTime));
    for name in ["wolfram", "bing", "bard", "google"] {
        collaborators = collaborators.with_tool(name, Box::new(Echo { name }));
    }
    collaborators
}
