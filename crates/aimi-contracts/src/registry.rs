//! The explicit action registry.
//!
//! Every call the model may make is listed here. The registry is built once
//! at session start and passed by reference into the interpreter, the
//! dispatcher, and the repair pipeline; there is no ambient global lookup.
//! Anything not registered is denied.

use std::collections::HashMap;

use crate::{
    action::{ActionToolItem, ExecuteLevel, CHAT_FROM_PREFIX, CHAT_TO_PREFIX},
    error::{AimiError, AimiResult},
};

/// The allow-list of callable actions, keyed by call name.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    items: HashMap<String, ActionToolItem>,
    /// Registration order, used when presenting the catalog.
    order: Vec<String>,
}

impl ActionRegistry {
    /// Build a registry from `items`, refusing duplicates and reserved names.
    pub fn from_items(items: impl IntoIterator<Item = ActionToolItem>) -> AimiResult<Self> {
        let mut registry = Self::default();
        for item in items {
            registry.register(item).map_err(|e| AimiError::ConfigError {
                reason: e.to_string(),
            })?;
        }
        Ok(registry)
    }

    /// Add one item. Existing entries are never replaced.
    pub fn register(&mut self, item: ActionToolItem) -> AimiResult<()> {
        if item.call.is_empty() {
            return Err(AimiError::ActionExecution {
                call: item.call,
                reason: "call name must not be empty".to_string(),
            });
        }
        if item.call.starts_with(CHAT_FROM_PREFIX) {
            return Err(AimiError::FabricatedOperatorMessage { call: item.call });
        }
        if self.items.contains_key(&item.call) {
            return Err(AimiError::ActionExecution {
                reason: format!("call '{}' already exists", item.call),
                call: item.call,
            });
        }
        self.order.push(item.call.clone());
        self.items.insert(item.call.clone(), item);
        Ok(())
    }

    /// Return true if `call` may be made.
    pub fn allows(&self, call: &str) -> bool {
        self.items.contains_key(call)
    }

    pub fn get(&self, call: &str) -> Option<&ActionToolItem> {
        self.items.get(call)
    }

    /// The authoritative execute level for `call`, if registered.
    pub fn execute_level(&self, call: &str) -> Option<ExecuteLevel> {
        self.items.get(call).map(|item| item.execute)
    }

    /// All items in registration order.
    pub fn all(&self) -> impl Iterator<Item = &ActionToolItem> {
        self.order.iter().filter_map(|call| self.items.get(call))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// True if `call` carries the prefix that implies runtime execution.
pub fn implies_system(call: &str) -> bool {
    call.starts_with(CHAT_TO_PREFIX)
}
