//! Mock collaborators shared by the core's unit tests.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use aimi_contracts::{
    action::ActionRecord,
    error::{AimiError, AimiResult},
    registry::ActionRegistry,
    render::SandboxOutcome,
    task::MemoryLimits,
};
use aimi_memory::AgentStateStore;
use aimi_policy::ActionPolicy;

use crate::{
    context::{Collaborators, TurnContext},
    traits::{BatchRepairer, OperatorSink, SandboxRunner, ToolClient, ToolReply},
};

struct RecordingSink {
    delivered: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl OperatorSink for RecordingSink {
    fn deliver(&self, text: &str) -> AimiResult<()> {
        if self.fail {
            return Err(AimiError::ActionExecution {
                call: "chat_to_operator".to_string(),
                reason: "gateway down".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct ScriptedSandbox {
    runs: Arc<Mutex<Vec<String>>>,
}

impl SandboxRunner for ScriptedSandbox {
    fn run(&self, code: &str) -> AimiResult<SandboxOutcome> {
        self.runs.lock().unwrap().push(code.to_string());
        Ok(SandboxOutcome {
            exit_status: 0,
            stdout: format!("ran: {code}\n"),
            stderr: String::new(),
            elapsed_ms: 1,
        })
    }
}

struct FixedTool(&'static str);

impl ToolClient for FixedTool {
    fn query(&self, _request: &Value) -> AimiResult<ToolReply> {
        Ok(ToolReply::Text(self.0.to_string()))
    }
}

struct PiecewiseTool(Vec<&'static str>);

impl ToolClient for PiecewiseTool {
    fn query(&self, _request: &Value) -> AimiResult<ToolReply> {
        let pieces: Vec<AimiResult<String>> =
            self.0.iter().map(|p| Ok(p.to_string())).collect();
        Ok(ToolReply::Stream(Box::new(pieces.into_iter())))
    }
}

/// Decodes a strict JSON array with no repair at all.
pub(crate) struct StrictDecoder;

impl BatchRepairer for StrictDecoder {
    fn decode(
        &self,
        text: &str,
        _registry: &ActionRegistry,
    ) -> AimiResult<Vec<AimiResult<ActionRecord>>> {
        let items: Vec<Value> =
            serde_json::from_str(text).map_err(|e| AimiError::RepairFailure {
                reason: e.to_string(),
                original: text.to_string(),
            })?;
        Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| AimiError::RequestShape {
                    call: format!("root[{i}]"),
                    reason: e.to_string(),
                })
            })
            .collect())
    }
}

/// A session wired to the built-in registry and recording mocks.
///
/// The `wolfram` tool answers "4" at once, `bing` answers in two pieces,
/// and no client is registered for `google`.
pub(crate) struct Harness {
    pub registry: ActionRegistry,
    pub store: AgentStateStore,
    pub collaborators: Collaborators,
    pub delivered: Arc<Mutex<Vec<String>>>,
    pub runs: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_failing_sink() -> Self {
        Self::build(true)
    }

    fn build(fail: bool) -> Self {
        let registry = ActionPolicy::builtin()
            .expect("built-in policy must load")
            .registry()
            .clone();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let runs = Arc::new(Mutex::new(Vec::new()));
        let collaborators = Collaborators::new(
            Box::new(RecordingSink {
                delivered: Arc::clone(&delivered),
                fail,
            }),
            Box::new(ScriptedSandbox {
                runs: Arc::clone(&runs),
            }),
        )
        .with_tool("wolfram", Box::new(FixedTool("4")))
        .with_tool("bing", Box::new(PiecewiseTool(vec!["one ", "two"])));

        Self {
            registry,
            store: AgentStateStore::new(MemoryLimits {
                log_ceiling_bytes: 1 << 20,
                ..MemoryLimits::default()
            }),
            collaborators,
            delivered,
            runs,
        }
    }

    pub fn ctx(&mut self) -> TurnContext<'_> {
        TurnContext::new(&mut self.registry, &mut self.store, &self.collaborators)
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}
