//! The per-turn view of session state handed to both interpretation paths.

use std::collections::HashMap;

use aimi_contracts::registry::ActionRegistry;
use aimi_memory::AgentStateStore;

use crate::traits::{OperatorSink, SandboxRunner, ToolClient};

/// The external collaborators of one session.
pub struct Collaborators {
    pub sink: Box<dyn OperatorSink>,
    pub sandbox: Box<dyn SandboxRunner>,
    /// Tool clients keyed by the `tool` name registry items refer to.
    pub tools: HashMap<String, Box<dyn ToolClient>>,
}

impl Collaborators {
    pub fn new(sink: Box<dyn OperatorSink>, sandbox: Box<dyn SandboxRunner>) -> Self {
        Self {
            sink,
            sandbox,
            tools: HashMap::new(),
        }
    }

    /// Register `client` under `name`, replacing any earlier client.
    pub fn with_tool(mut self, name: impl Into<String>, client: Box<dyn ToolClient>) -> Self {
        self.tools.insert(name.into(), client);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&dyn ToolClient> {
        self.tools.get(name).map(|client| client.as_ref())
    }
}

/// Everything an action may read or change during one model turn.
///
/// The registry is mutable because the model can register its own actions
/// mid-turn; the state store because every accepted record lands there.
pub struct TurnContext<'c> {
    pub registry: &'c mut ActionRegistry,
    pub store: &'c mut AgentStateStore,
    pub collaborators: &'c Collaborators,
}

impl<'c> TurnContext<'c> {
    pub fn new(
        registry: &'c mut ActionRegistry,
        store: &'c mut AgentStateStore,
        collaborators: &'c Collaborators,
    ) -> Self {
        Self {
            registry,
            store,
            collaborators,
        }
    }
}
