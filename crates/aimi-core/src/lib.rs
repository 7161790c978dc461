//! # aimi-core
//!
//! The two interpretation paths of the Aimi agent protocol.
//!
//! This crate provides:
//! - The collaborator traits (`OperatorSink`, `SandboxRunner`, `ToolClient`,
//!   `BatchRepairer`) through which the core reaches the outside world
//! - `StreamInterpreter`, which acts on a model response while it streams
//! - `Dispatcher`, which acts on a fully buffered response
//!
//! Both paths run accepted records through the same effects, so a response
//! leaves the same log behind whichever path handled it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aimi_core::{StreamInterpreter, TurnContext};
//!
//! let mut ctx = TurnContext::new(&mut registry, &mut store, &collaborators);
//! let mut interp = StreamInterpreter::new();
//! for fragment in token_stream {
//!     for rendered in interp.feed(&fragment, &mut ctx) {
//!         show(rendered);
//!     }
//! }
//! interp.finish();
//! ```

pub mod context;
pub mod dispatcher;
pub mod effects;
pub mod interpreter;
pub mod traits;

#[cfg(test)]
mod testing;

pub use context::{Collaborators, TurnContext};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use interpreter::{InterpreterState, Render, StagedRecord, StreamInterpreter};
pub use traits::{BatchRepairer, OperatorSink, SandboxRunner, ToolClient, ToolReply};
