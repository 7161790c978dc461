//! The agent state store.
//!
//! `AgentStateStore` owns everything the agent remembers between turns: the
//! bounded action log, the task list, and the note list. It also owns the
//! logical clock that stamps every appended record.
//!
//! The log is bounded by its serialized size. When it grows past the
//! ceiling, the store evicts the oldest entry of whichever execute class
//! currently dominates, so operator-facing system history and the agent's
//! own AI history stay roughly balanced instead of being pruned by age.

use std::collections::VecDeque;

use serde_json::json;
use tracing::{debug, info};

use aimi_contracts::{
    action::{ActionRecord, ExecuteLevel, OPERATOR_MESSAGE_CALL},
    error::{AimiError, AimiResult},
    task::{MemoryLimits, TaskItem, TaskStep, IDLE_TASK_ID},
};

use crate::snapshot::StateSnapshot;

// ── Log entries ───────────────────────────────────────────────────────────────

/// A logged record plus its cached serialized size.
#[derive(Debug, Clone)]
struct LogEntry {
    record: ActionRecord,
    size: usize,
}

impl LogEntry {
    fn new(record: ActionRecord) -> Self {
        let size = serialized_size(&record);
        Self { record, size }
    }
}

fn serialized_size(record: &ActionRecord) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0)
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Per-session agent memory.
///
/// One instance per conversational session; nothing here is shared.
#[derive(Debug, Clone)]
pub struct AgentStateStore {
    limits: MemoryLimits,
    /// The next timestamp to hand out. Starts at 1.
    clock: u64,
    log: VecDeque<LogEntry>,
    log_bytes: usize,
    tasks: Vec<TaskItem>,
    current_task: Option<String>,
    notes: Vec<String>,
}

impl AgentStateStore {
    /// A fresh store holding only the idle task.
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            limits,
            clock: 1,
            log: VecDeque::new(),
            log_bytes: 0,
            tasks: vec![TaskItem::idle()],
            current_task: Some(IDLE_TASK_ID.to_string()),
            notes: Vec::new(),
        }
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    // ── Logical clock ─────────────────────────────────────────────────────────

    /// The timestamp the next appended record will receive unless it
    /// carries a later one of its own.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Reserve and return the next timestamp.
    pub fn next_timestamp(&mut self) -> u64 {
        let ts = self.clock;
        self.clock += 1;
        ts
    }

    // ── Action log ────────────────────────────────────────────────────────────

    /// Append `record` and return the timestamp it was stored under.
    ///
    /// Unstamped records take the next clock value. A stamped record keeps
    /// its timestamp when it is not behind the clock; otherwise it is
    /// restamped forward so the log stays strictly increasing. Eviction
    /// runs after every append.
    pub fn append(&mut self, mut record: ActionRecord) -> u64 {
        let ts = match record.timestamp {
            Some(requested) if requested >= self.clock => requested,
            Some(requested) => {
                debug!(
                    call = %record.call,
                    requested,
                    clock = self.clock,
                    "restamping record forward"
                );
                self.clock
            }
            None => self.clock,
        };
        record.timestamp = Some(ts);
        self.clock = ts + 1;

        let entry = LogEntry::new(record);
        self.log_bytes += entry.size;
        debug!(
            timestamp = ts,
            call = %entry.record.call,
            execute = entry.record.execute.as_str(),
            bytes = entry.size,
            "record appended"
        );
        self.log.push_back(entry);
        self.evict();
        ts
    }

    /// Fill fields of an already-appended record in place.
    ///
    /// The timestamp cannot be changed through `f`. Returns false when no
    /// record with `timestamp` is in the log (it may have been evicted).
    pub fn amend(&mut self, timestamp: u64, f: impl FnOnce(&mut ActionRecord)) -> bool {
        let Some(entry) = self
            .log
            .iter_mut()
            .find(|e| e.record.timestamp == Some(timestamp))
        else {
            return false;
        };
        f(&mut entry.record);
        entry.record.timestamp = Some(timestamp);

        let size = serialized_size(&entry.record);
        self.log_bytes = self.log_bytes - entry.size + size;
        entry.size = size;
        self.evict();
        true
    }

    /// Append the operator's own message as a system record.
    pub fn record_operator_message(&mut self, content: &str) -> u64 {
        self.append(ActionRecord::system(
            OPERATOR_MESSAGE_CALL,
            json!({ "content": content }),
        ))
    }

    /// The log in append order.
    pub fn log(&self) -> impl Iterator<Item = &ActionRecord> {
        self.log.iter().map(|e| &e.record)
    }

    pub fn record(&self, timestamp: u64) -> Option<&ActionRecord> {
        self.log()
            .find(|r| r.timestamp == Some(timestamp))
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Serialized size of the log, in bytes.
    pub fn log_bytes(&self) -> usize {
        self.log_bytes
    }

    fn evict(&mut self) {
        while self.log_bytes > self.limits.log_ceiling_bytes && !self.log.is_empty() {
            let system = self.log.iter().filter(|e| e.record.is_system()).count();
            let ai = self.log.len() - system;

            // Ties go to the AI side.
            let dominant = if system > ai {
                ExecuteLevel::System
            } else {
                ExecuteLevel::Ai
            };

            let Some(pos) = self
                .log
                .iter()
                .position(|e| e.record.execute == dominant)
            else {
                break;
            };
            if let Some(evicted) = self.log.remove(pos) {
                self.log_bytes -= evicted.size;
                debug!(
                    timestamp = evicted.record.timestamp.unwrap_or_default(),
                    call = %evicted.record.call,
                    execute = dominant.as_str(),
                    remaining_bytes = self.log_bytes,
                    "record evicted"
                );
            }
        }
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    /// Create or replace a task and make it current. Returns its id.
    ///
    /// Without a `task_id`, or with one that matches nothing, a new task is
    /// created. Creating a real task retires the idle placeholder.
    pub fn set_task_info(
        &mut self,
        task_id: Option<&str>,
        task_info: &str,
        task_check: &str,
    ) -> String {
        let existing = task_id.and_then(|id| self.tasks.iter().position(|t| t.task_id == id));

        let id = match existing {
            Some(pos) => {
                let task = &mut self.tasks[pos];
                task.task_info = task_info.to_string();
                task.task_check = task_check.to_string();
                task.task_step.clear();
                task.current_step_id = None;
                task.task_id.clone()
            }
            None => {
                let id = match task_id {
                    Some(id) if id != IDLE_TASK_ID && !id.is_empty() => id.to_string(),
                    _ => self.fresh_task_id(),
                };
                self.tasks.retain(|t| t.task_id != IDLE_TASK_ID);
                self.tasks.push(TaskItem {
                    task_id: id.clone(),
                    task_info: task_info.to_string(),
                    task_check: task_check.to_string(),
                    task_step: Vec::new(),
                    current_step_id: None,
                });
                id
            }
        };

        info!(task_id = %id, "task set");
        self.current_task = Some(id.clone());
        id
    }

    fn fresh_task_id(&self) -> String {
        let highest = self
            .tasks
            .iter()
            .filter_map(|t| t.task_id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (highest + 1).to_string()
    }

    /// Attach or replace the steps of a task.
    ///
    /// Every step that names a call must name a registered one, and
    /// `current_step_id`, when given, must name one of the steps.
    pub fn set_task_step(
        &mut self,
        task_id: &str,
        steps: Vec<TaskStep>,
        current_step_id: Option<String>,
        is_registered: impl Fn(&str) -> bool,
    ) -> AimiResult<()> {
        let shape_error = |reason: String| AimiError::RequestShape {
            call: "set_task_step".to_string(),
            reason,
        };

        if let Some(step) = steps
            .iter()
            .find(|s| s.call.as_deref().is_some_and(|c| !is_registered(c)))
        {
            return Err(shape_error(format!(
                "step '{}' references unregistered call '{}'",
                step.step_id,
                step.call.as_deref().unwrap_or_default()
            )));
        }
        if let Some(current) = &current_step_id {
            if !steps.iter().any(|s| &s.step_id == current) {
                return Err(shape_error(format!("current step '{current}' is not a step")));
            }
        }

        let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return Err(shape_error(format!("no task with id '{task_id}'")));
        };
        task.current_step_id = current_step_id.or_else(|| steps.first().map(|s| s.step_id.clone()));
        task.task_step = steps;
        debug!(task_id = %task_id, steps = task.task_step.len(), "task steps set");
        Ok(())
    }

    /// Judge a task. On success the task is retired and returned; when no
    /// task remains the idle task takes its place.
    ///
    /// Without a `task_id` the current task is judged.
    pub fn critic(&mut self, task_id: Option<&str>, success: bool) -> AimiResult<Option<TaskItem>> {
        let target = task_id
            .map(str::to_string)
            .or_else(|| self.current_task.clone())
            .ok_or_else(|| AimiError::RequestShape {
                call: "critic".to_string(),
                reason: "there is no current task".to_string(),
            })?;

        let Some(pos) = self.tasks.iter().position(|t| t.task_id == target) else {
            return Err(AimiError::RequestShape {
                call: "critic".to_string(),
                reason: format!("no task with id '{target}'"),
            });
        };

        if !success {
            debug!(task_id = %target, "critic judged task incomplete");
            return Ok(None);
        }

        let retired = self.tasks.remove(pos);
        if self.tasks.is_empty() {
            self.tasks.push(TaskItem::idle());
        }
        if self.current_task.as_deref() == Some(target.as_str()) {
            self.current_task = self.tasks.first().map(|t| t.task_id.clone());
        }
        info!(task_id = %retired.task_id, "task retired");
        Ok(Some(retired))
    }

    pub fn current_task(&self) -> Option<&TaskItem> {
        let id = self.current_task.as_deref()?;
        self.tasks.iter().find(|t| t.task_id == id)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskItem> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn tasks(&self) -> &[TaskItem] {
        &self.tasks
    }

    // ── Notes ─────────────────────────────────────────────────────────────────

    /// Store a note. Returns the note evicted to make room, if any.
    ///
    /// The first `protected_notes` notes are never evicted. When every
    /// stored note is protected and the list is full, the new note is
    /// refused.
    pub fn push_note(&mut self, content: impl Into<String>) -> AimiResult<Option<String>> {
        let capacity = self.limits.note_capacity;
        let mut evicted = None;

        if self.notes.len() >= capacity {
            let protected = self.limits.protected_notes;
            if protected >= self.notes.len() || capacity == 0 {
                return Err(AimiError::ActionExecution {
                    call: "chat_to_note".to_string(),
                    reason: format!("all {} notes are protected", self.notes.len()),
                });
            }
            evicted = Some(self.notes.remove(protected));
        }

        self.notes.push(content.into());
        debug!(notes = self.notes.len(), evicted = evicted.is_some(), "note stored");
        Ok(evicted)
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    /// Capture the whole store for persistence.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            clock: self.clock,
            log: self.log().cloned().collect(),
            tasks: self.tasks.clone(),
            current_task: self.current_task.clone(),
            notes: self.notes.clone(),
            saved_at: None,
        }
    }

    /// Rebuild a store from a snapshot under `limits`.
    ///
    /// The clock never restarts behind a logged timestamp, and the log and
    /// notes are trimmed to the new limits.
    pub fn restore(snapshot: StateSnapshot, limits: MemoryLimits) -> Self {
        let last = snapshot
            .log
            .iter()
            .filter_map(|r| r.timestamp)
            .max()
            .unwrap_or(0);
        let log: VecDeque<LogEntry> = snapshot.log.into_iter().map(LogEntry::new).collect();
        let log_bytes = log.iter().map(|e| e.size).sum();

        let mut tasks = snapshot.tasks;
        if tasks.is_empty() {
            tasks.push(TaskItem::idle());
        }
        let current_task = snapshot
            .current_task
            .filter(|id| tasks.iter().any(|t| &t.task_id == id))
            .or_else(|| tasks.first().map(|t| t.task_id.clone()));

        let mut notes = snapshot.notes;
        while notes.len() > limits.note_capacity && notes.len() > limits.protected_notes {
            notes.remove(limits.protected_notes);
        }

        let mut store = Self {
            clock: snapshot.clock.max(last + 1).max(1),
            limits,
            log,
            log_bytes,
            tasks,
            current_task,
            notes,
        };
        store.evict();
        store
    }
}

impl Default for AgentStateStore {
    fn default() -> Self {
        Self::new(MemoryLimits::default())
    }
}
