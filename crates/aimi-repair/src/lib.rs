//! # aimi-repair
//!
//! Tolerant decoding of buffered model output for the Aimi runtime.
//!
//! This crate provides [`engine::RepairPipeline`], which implements the
//! [`aimi_core::traits::BatchRepairer`] trait. Near-miss output is recovered
//! in two phases:
//!
//! 1. **Text**: ordered pure rules (`strip_code_fence`,
//!    `wrap_single_object`, `slice_outer_array`, `unescape_doubled_quotes`)
//!    applied until the text parses as an array.
//! 2. **Elements**: legacy keys split, execute levels taken from the
//!    registry, type markers filled, and requests checked against each
//!    action's JSON Schema via the `jsonschema` crate.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use aimi_core::Dispatcher;
//! use aimi_repair::RepairPipeline;
//!
//! let dispatcher = Dispatcher::new(Box::new(RepairPipeline::new()));
//! let report = dispatcher.dispatch(&buffered_text, &mut ctx);
//! ```

pub mod engine;
pub mod rules;
pub mod semantic;

pub use engine::{RepairPipeline, Repaired};
pub use rules::{RepairRule, DEFAULT_RULES};
