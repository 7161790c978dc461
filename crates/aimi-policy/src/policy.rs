//! The loaded action policy.
//!
//! `ActionPolicy` turns a `PolicyConfig` into the explicit registry that the
//! interpreter, dispatcher and repair pipeline consult. Evaluation is
//! deny-by-default: a call that no `[[actions]]` entry names is refused.

use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use aimi_contracts::{
    action::ExecuteLevel,
    error::{AimiError, AimiResult},
    registry::ActionRegistry,
    task::MemoryLimits,
};

use crate::config::PolicyConfig;

/// The policy shipped with the runtime.
pub const BUILTIN_POLICY: &str = include_str!("../../../config/aimi.toml");

/// A validated configuration plus the registry built from it.
///
/// ```rust,ignore
/// use aimi_policy::ActionPolicy;
///
/// let policy = ActionPolicy::from_file(Path::new("config/aimi.toml"))?;
/// let mut registry = policy.registry().clone();
/// ```
#[derive(Debug, Clone)]
pub struct ActionPolicy {
    config: PolicyConfig,
    registry: ActionRegistry,
}

impl ActionPolicy {
    /// Parse `s` as TOML and build the registry.
    ///
    /// Returns `AimiError::ConfigError` if the TOML is malformed, does not
    /// match `PolicyConfig`, or names a call twice or with a reserved prefix.
    pub fn from_toml_str(s: &str) -> AimiResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| AimiError::ConfigError {
            reason: format!("failed to parse action policy TOML: {}", e),
        })?;
        Self::from_config(config)
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> AimiResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AimiError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        let policy = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), actions = policy.registry.len(), "action policy loaded");
        Ok(policy)
    }

    /// The policy embedded from `config/aimi.toml`.
    pub fn builtin() -> AimiResult<Self> {
        Self::from_toml_str(BUILTIN_POLICY)
    }

    pub fn from_config(config: PolicyConfig) -> AimiResult<Self> {
        config.validate()?;
        let registry = ActionRegistry::from_items(config.actions.iter().cloned())?;
        debug!(actions = registry.len(), "action registry built");
        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn memory_limits(&self) -> &MemoryLimits {
        &self.config.memory
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide whether `call` may run and at which execute level.
    ///
    /// Registered calls are allowed at their configured level. Anything
    /// else is `DisallowedCall`.
    pub fn check(&self, call: &str) -> AimiResult<ExecuteLevel> {
        match self.registry.execute_level(call) {
            Some(level) => {
                debug!(call = %call, execute = level.as_str(), "call allowed");
                Ok(level)
            }
            None => {
                warn!(call = %call, "no action entry matched; denying by default");
                Err(AimiError::DisallowedCall {
                    call: call.to_string(),
                })
            }
        }
    }

    /// The action list as presented to the model: one object per action
    /// with its call, description, request template and execute level.
    pub fn catalog(&self) -> Value {
        catalog(&self.registry)
    }
}

/// Describe every action in `registry`, in registration order.
pub fn catalog(registry: &ActionRegistry) -> Value {
    Value::Array(
        registry
            .all()
            .map(|item| {
                json!({
                    "call": item.call,
                    "description": item.description,
                    "request": item.request,
                    "execute": item.execute,
                })
            })
            .collect(),
    )
}
