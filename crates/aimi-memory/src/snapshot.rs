//! Snapshots of the state store and the persistence collaborators that
//! load and save them.
//!
//! Persistence runs at session boundaries only: the caller loads a snapshot
//! before the first turn and saves one after the last. Nothing on the
//! interpretation hot path touches storage.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aimi_contracts::{
    action::ActionRecord,
    error::{AimiError, AimiResult},
    task::TaskItem,
};

use crate::session::SessionId;

/// Everything the store remembers, in a serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The next timestamp the store would hand out.
    pub clock: u64,
    pub log: Vec<ActionRecord>,
    pub tasks: Vec<TaskItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Wall-clock time the snapshot was written. Set by the persistence
    /// collaborator, never by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Durable storage for one session's snapshot.
pub trait StatePersistence: Send + Sync {
    /// Load the stored snapshot, or `None` when nothing has been saved yet.
    fn load(&self) -> AimiResult<Option<StateSnapshot>>;

    fn save(&self, snapshot: &StateSnapshot) -> AimiResult<()>;
}

// ── JSON file ─────────────────────────────────────────────────────────────────

/// Stores the snapshot as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file for `session` inside `dir`: `<dir>/<session id>.json`.
    pub fn for_session(dir: impl AsRef<Path>, session: &SessionId) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", session.as_str())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persistence_error(action: &str, path: &Path, err: impl std::fmt::Display) -> AimiError {
    AimiError::Persistence {
        reason: format!("failed to {} {}: {}", action, path.display(), err),
    }
}

impl StatePersistence for JsonFileStore {
    fn load(&self) -> AimiResult<Option<StateSnapshot>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no saved state");
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| persistence_error("read", &self.path, e))?;
        let snapshot: StateSnapshot = serde_json::from_str(&text)
            .map_err(|e| persistence_error("decode", &self.path, e))?;
        info!(
            path = %self.path.display(),
            records = snapshot.log.len(),
            tasks = snapshot.tasks.len(),
            "state loaded"
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StateSnapshot) -> AimiResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| persistence_error("create", dir, e))?;
        }
        let stamped = StateSnapshot {
            saved_at: Some(Utc::now()),
            ..snapshot.clone()
        };
        let text = serde_json::to_string_pretty(&stamped)
            .map_err(|e| persistence_error("encode", &self.path, e))?;
        fs::write(&self.path, text).map_err(|e| persistence_error("write", &self.path, e))?;
        info!(path = %self.path.display(), records = stamped.log.len(), "state saved");
        Ok(())
    }
}

// ── In memory ─────────────────────────────────────────────────────────────────

/// Keeps the last saved snapshot in memory. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    slot: Arc<Mutex<Option<StateSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatePersistence for InMemoryPersistence {
    fn load(&self) -> AimiResult<Option<StateSnapshot>> {
        let slot = self.slot.lock().map_err(|e| AimiError::Persistence {
            reason: format!("state slot lock poisoned: {}", e),
        })?;
        Ok(slot.clone())
    }

    fn save(&self, snapshot: &StateSnapshot) -> AimiResult<()> {
        let mut slot = self.slot.lock().map_err(|e| AimiError::Persistence {
            reason: format!("state slot lock poisoned: {}", e),
        })?;
        *slot = Some(StateSnapshot {
            saved_at: Some(Utc::now()),
            ..snapshot.clone()
        });
        Ok(())
    }
}
