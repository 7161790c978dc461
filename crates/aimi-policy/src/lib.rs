//! # aimi-policy
//!
//! TOML-driven, deny-by-default action registry for the Aimi runtime.
//!
//! ## Overview
//!
//! This crate loads [`PolicyConfig`] from TOML and builds an
//! [`ActionPolicy`]: the explicit registry of every call the model may make,
//! plus the memory limits of the state store. A call that no `[[actions]]`
//! entry names is never dispatched.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use aimi_policy::ActionPolicy;
//!
//! let policy = ActionPolicy::builtin()?;
//! assert!(policy.registry().allows("chat_to_operator"));
//! ```

pub mod config;
pub mod policy;

pub use config::PolicyConfig;
pub use policy::{catalog, ActionPolicy, BUILTIN_POLICY};

// ── Tests ─────────────────────────────────────────────────────────────────────
