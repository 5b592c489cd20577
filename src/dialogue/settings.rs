//! Per-session dialogue knobs.

use thiserror::Error;

use crate::core::config::DialogueConfig;

use super::prompt::PromptBuilder;
use super::transcript::{Delimiters, Names};

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("call delimiters must not be empty")]
    EmptyDelimiter,
    #[error("speaker label must not be empty")]
    EmptyLabel,
    #[error("max_rounds must be at least 1")]
    ZeroRounds,
}

#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub names: Names,
    pub delimiters: Delimiters,
    /// Marker that ends the session when it appears in plain text.
    pub end_token: Option<String>,
    pub temperature: f32,
    /// Used for every attempt after a rejected call.
    pub retry_temperature: f32,
    pub max_validation_retries: u32,
    pub max_tokens: u32,
    /// Completion requests allowed per `submit`.
    pub max_rounds: u32,
    pub debug: bool,
    pub surface_call_preamble: bool,
    pub extra_instructions: Option<String>,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            names: Names::default(),
            delimiters: Delimiters::default(),
            end_token: None,
            temperature: 0.9,
            retry_temperature: 0.9,
            max_validation_retries: 0,
            max_tokens: 750,
            max_rounds: 16,
            debug: false,
            surface_call_preamble: false,
            extra_instructions: None,
        }
    }
}

impl DialogueSettings {
    /// Reject settings no session can run with. A blank end token is
    /// dropped rather than rejected, since it would end every reply.
    pub fn validate(mut self) -> Result<Self, SettingsError> {
        if self.delimiters.open.is_empty() || self.delimiters.close.is_empty() {
            return Err(SettingsError::EmptyDelimiter);
        }
        let names = &self.names;
        if [&names.assistant, &names.user, &names.system]
            .iter()
            .any(|n| n.trim().is_empty())
        {
            return Err(SettingsError::EmptyLabel);
        }
        if self.max_rounds == 0 {
            return Err(SettingsError::ZeroRounds);
        }
        self.end_token = self.end_token.filter(|t| !t.trim().is_empty());
        Ok(self)
    }

    /// Resolve settings from config, folding `instructions_file` into the
    /// extra instructions.
    pub fn from_config(config: &DialogueConfig) -> Self {
        let mut extra = PromptBuilder::new();
        if let Some(text) = &config.extra_instructions {
            extra = extra.append(text);
        }
        if let Some(path) = &config.instructions_file {
            extra = extra.layer(path);
        }
        let extra_instructions = (!extra.is_empty()).then(|| extra.build());

        Self {
            names: Names {
                assistant: config.assistant_name.clone(),
                user: config.user_name.clone(),
                system: config.system_name.clone(),
            },
            delimiters: Delimiters {
                open: config.call_open.clone(),
                close: config.call_close.clone(),
            },
            end_token: config.end_token.clone(),
            temperature: config.temperature,
            retry_temperature: config.retry_temperature,
            max_validation_retries: config.max_validation_retries,
            max_tokens: config.max_tokens,
            max_rounds: config.max_rounds.max(1),
            debug: config.debug,
            surface_call_preamble: config.surface_call_preamble,
            extra_instructions,
        }
    }
}
