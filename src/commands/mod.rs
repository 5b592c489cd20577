//! Local command backend.
//!
//! Commands are typed handlers registered explicitly at startup and reached
//! through the same call contract as plugins, with a
//! `{"command": name, "params": {...}}` payload.

pub mod booking;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("command already registered: {0}")]
    Duplicate(String),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam { name: name.to_string(), reason: reason.into() }
    }
}

/// A callable local command.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Parameters for the worked example in the prompt.
    fn example_params(&self) -> Value;

    fn invoke(&self, params: &Map<String, Value>) -> Result<String, CommandError>;
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Box<dyn Command>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Box<dyn Command>) -> Result<(), CommandError> {
        let name = command.name().to_string();
        if self.commands.contains_key(&name) {
            return Err(CommandError::Duplicate(name));
        }
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn invoke(&self, name: &str, params: &Map<String, Value>) -> Result<String, CommandError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        tracing::debug!(command = %name, "invoking command");
        command.invoke(params)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.commands.values().map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ── Parameter helpers ─────────────────────────────────────────────────────────

pub(crate) fn required_str<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a str, CommandError> {
    match params.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(CommandError::invalid(name, "must not be empty")),
        Some(_) => Err(CommandError::invalid(name, "expected a string")),
        None => Err(CommandError::invalid(name, "missing")),
    }
}

pub(crate) fn optional_u32(params: &Map<String, Value>, name: &str) -> Result<Option<u32>, CommandError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| CommandError::invalid(name, "expected a positive integer")),
    }
}
