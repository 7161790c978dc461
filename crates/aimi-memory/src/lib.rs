//! # aimi-memory
//!
//! Per-session agent memory for the Aimi runtime: the bounded action log,
//! the task list, notes, and the logical clock.
//!
//! ## Overview
//!
//! Both interpretation paths append finished `ActionRecord`s here. The log
//! is bounded by serialized size and evicts by execute class so system and
//! AI history stay balanced. Tasks are created by `set_task_info`, given
//! steps by `set_task_step`, and retired by `critic`; when the last task is
//! retired an idle task takes its place.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aimi_memory::{AgentStateStore, JsonFileStore, SessionId, StatePersistence};
//!
//! let persistence = JsonFileStore::for_session("state", &SessionId::from_key("chat-42"));
//! let mut store = match persistence.load()? {
//!     Some(snapshot) => AgentStateStore::restore(snapshot, limits),
//!     None => AgentStateStore::new(limits),
//! };
//! store.record_operator_message("hello");
//! persistence.save(&store.snapshot())?;
//! ```

pub mod session;
pub mod snapshot;
pub mod store;

pub use session::SessionId;
pub use snapshot::{InMemoryPersistence, JsonFileStore, StatePersistence, StateSnapshot};
pub use store::AgentStateStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
