//! Task, note, and memory-limit types held by the agent state store.

use serde::{Deserialize, Serialize};

/// Task id of the idle task synthesized when nothing else is pending.
pub const IDLE_TASK_ID: &str = "0";

/// One step towards a task's goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub step_id: String,
    pub step: String,
    /// The registered call this step expects to use, if it names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
}

/// A goal the agent is working towards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub task_id: String,
    /// The goal text.
    pub task_info: String,
    /// Completion criterion the critic judges against.
    #[serde(default)]
    pub task_check: String,
    #[serde(default)]
    pub task_step: Vec<TaskStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
}

impl TaskItem {
    /// The task that stands in when no real task remains.
    pub fn idle() -> Self {
        Self {
            task_id: IDLE_TASK_ID.to_string(),
            task_info: "Nothing to do right now; chat with the operator.".to_string(),
            task_check: String::new(),
            task_step: Vec::new(),
            current_step_id: None,
        }
    }
}

/// Limits applied by the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Ceiling on the serialized size of the action log, in bytes.
    #[serde(default = "default_log_ceiling")]
    pub log_ceiling_bytes: usize,
    /// Maximum number of notes kept.
    #[serde(default = "default_note_capacity")]
    pub note_capacity: usize,
    /// Leading notes that are never evicted.
    #[serde(default = "default_protected_notes")]
    pub protected_notes: usize,
}

fn default_log_ceiling() -> usize {
    4096
}

fn default_note_capacity() -> usize {
    16
}

fn default_protected_notes() -> usize {
    2
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            log_ceiling_bytes: default_log_ceiling(),
            note_capacity: default_note_capacity(),
            protected_notes: default_protected_notes(),
        }
    }
}
