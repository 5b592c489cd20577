//! parley: an LLM dialogue orchestration layer.
//!
//! A session keeps a plain-text transcript, asks a completion backend to
//! continue it, pulls delimited JSON calls out of the replies, routes them
//! to HTTP plugins (or in-process commands) and feeds the results back as
//! system turns until the model answers without a call.

pub mod bootstrap;
pub mod commands;
pub mod comms;
pub mod core;
pub mod dialogue;
pub mod llm;
pub mod plugins;
pub mod runtime;

pub use self::core::{config, error};
