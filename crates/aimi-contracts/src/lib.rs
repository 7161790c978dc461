//! # aimi-contracts
//!
//! Shared types, registry values, and error contracts for the Aimi action
//! protocol.
//!
//! All crates in the workspace import from here. No interpretation logic
//! lives in this crate, only data definitions and small helpers.

pub mod action;
pub mod error;
pub mod registry;
pub mod render;
pub mod task;
