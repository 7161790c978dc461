//! Configuration schema for the action registry and memory limits.
//!
//! A `PolicyConfig` is deserialized from TOML. Actions are listed in
//! `[[actions]]` tables in the order they should be presented to the model.
//!
//! Example:
//! ```toml
//! [memory]
//! log_ceiling_bytes = 4096
//!
//! [[actions]]
//! call = "chat_to_operator"
//! description = "Send a message to the operator"
//! execute = "system"
//!
//! [actions.request]
//! content = "text to show the operator"
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use aimi_contracts::{
    action::{ActionToolItem, ExecuteLevel},
    error::{AimiError, AimiResult},
    registry::implies_system,
    task::MemoryLimits,
};

/// The top-level structure deserialized from a TOML policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Limits for the state store. Missing keys take their defaults.
    #[serde(default)]
    pub memory: MemoryLimits,

    /// Every callable action. An empty list denies everything.
    #[serde(default)]
    pub actions: Vec<ActionToolItem>,
}

impl PolicyConfig {
    /// Check what the type system cannot.
    ///
    /// Duplicate and reserved call names are caught later, when the registry
    /// is built.
    pub fn validate(&self) -> AimiResult<()> {
        if self.memory.protected_notes > self.memory.note_capacity {
            return Err(AimiError::ConfigError {
                reason: format!(
                    "protected_notes ({}) exceeds note_capacity ({})",
                    self.memory.protected_notes, self.memory.note_capacity
                ),
            });
        }

        for item in &self.actions {
            if let Some(schema) = &item.request_schema {
                if !schema.is_object() {
                    return Err(AimiError::ConfigError {
                        reason: format!("request_schema of '{}' must be a table", item.call),
                    });
                }
            }
            if item.tool.as_deref().is_some_and(str::is_empty) {
                return Err(AimiError::ConfigError {
                    reason: format!("tool of '{}' must not be empty", item.call),
                });
            }
            if implies_system(&item.call) && item.execute == ExecuteLevel::Ai {
                warn!(call = %item.call, "chat_to_ action declared with AI execute level");
            }
        }
        Ok(())
    }
}
