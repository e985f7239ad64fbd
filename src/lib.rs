//! Tool-calling orchestration for an Obsidian vault assistant.
//!
//! Model replies are parsed into canonical tool calls, run against the vault
//! through a validate/execute/verify pipeline, and fed back to the model.

pub mod config;
pub mod context;
pub mod error;
pub mod intent;
pub mod markdown;
pub mod operations;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod tool_call;
pub mod validation;
pub mod vault;
pub mod verification;
