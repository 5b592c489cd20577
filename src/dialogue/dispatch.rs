//! The engine's single seam to whatever answers embedded calls.
//!
//! Dispatch runs in two phases. [`CallDispatcher::prepare`] checks the
//! decoded payload without side effects; its failures are the model's
//! mistakes and may be retried. [`CallDispatcher::execute`] performs the
//! call and always yields the text the model sees next.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::commands::{CommandError, CommandRegistry};
use crate::plugins::{PreparedRequest, Router, RouterError};

use super::extract::{CallPayloadError, parse_command_call, parse_plugin_call};
use super::prompt;
use super::transcript::{Delimiters, Names};

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error(transparent)]
    Payload(#[from] CallPayloadError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone)]
pub enum CallDispatcher {
    Plugins(Router),
    Commands(Arc<CommandRegistry>),
}

/// A validated call, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedCall {
    Plugin { plugin: String, request: PreparedRequest },
    Command { name: String, params: Map<String, Value> },
}

impl CallDispatcher {
    /// Instructions describing the call protocol, or `None` when nothing is
    /// callable.
    pub fn prompt_block(&self, names: &Names, delimiters: &Delimiters) -> Option<String> {
        match self {
            CallDispatcher::Plugins(router) => prompt::plugin_block(router.registry(), names, delimiters),
            CallDispatcher::Commands(registry) => prompt::command_block(registry, names, delimiters),
        }
    }

    pub fn prepare(&self, payload: &Value) -> Result<PreparedCall, DispatchError> {
        match self {
            CallDispatcher::Plugins(router) => {
                let call = parse_plugin_call(payload)?;
                let request = router.prepare(&call.plugin_system_name, call.request_object_params)?;
                Ok(PreparedCall::Plugin { plugin: call.plugin_system_name, request })
            }
            CallDispatcher::Commands(registry) => {
                let call = parse_command_call(payload)?;
                if !registry.contains(&call.command) {
                    return Err(CommandError::UnknownCommand(call.command).into());
                }
                Ok(PreparedCall::Command { name: call.command, params: call.params })
            }
        }
    }

    pub async fn execute(&self, call: PreparedCall) -> String {
        match (self, call) {
            (CallDispatcher::Plugins(router), PreparedCall::Plugin { plugin, request }) => {
                match router.send(&request).await {
                    Ok((status, text)) => {
                        debug!(%plugin, status, "plugin responded");
                        describe_response(status, &text)
                    }
                    Err(e) => {
                        warn!(%plugin, error = %e, "plugin call failed");
                        e.to_string()
                    }
                }
            }
            (CallDispatcher::Commands(registry), PreparedCall::Command { name, params }) => {
                match registry.invoke(&name, &params) {
                    Ok(result) => result,
                    Err(e) => {
                        debug!(command = %name, error = %e, "command failed");
                        e.to_string()
                    }
                }
            }
            _ => "call does not match the configured backend".to_string(),
        }
    }
}

/// Result text for a plugin response. Bodies are shown for 2xx only.
pub fn describe_response(status: u16, text: &str) -> String {
    let mut result = format!("API responded with HTTP status code {status}");
    if (200..300).contains(&status) {
        result.push_str(", response body: ");
        result.push_str(text);
    }
    result
}
