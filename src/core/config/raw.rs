//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use std::collections::HashMap;

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape, the serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub bot: RawBot,
    #[serde(default)]
    pub comms: RawComms,
    #[serde(default)]
    pub llm: RawLlm,
    #[serde(default)]
    pub dialogue: RawDialogue,
    #[serde(default)]
    pub plugins: RawPlugins,
}

#[derive(Deserialize)]
pub(super) struct RawBot {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RawBot {
    fn default() -> Self {
        Self { name: default_bot_name(), log_level: default_log_level() }
    }
}

// ── Comms ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawComms {
    #[serde(default)]
    pub pty: RawPty,
    #[serde(default)]
    pub ws: RawWs,
}

#[derive(Deserialize)]
pub(super) struct RawPty {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RawPty {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Deserialize)]
pub(super) struct RawWs {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ws_bind")]
    pub bind: String,
}

impl Default for RawWs {
    fn default() -> Self {
        Self { enabled: false, bind: default_ws_bind() }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

// ── Dialogue ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawDialogue {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_system_name")]
    pub system_name: String,
    #[serde(default = "default_call_open")]
    pub call_open: String,
    #[serde(default = "default_call_close")]
    pub call_close: String,
    #[serde(default)]
    pub end_token: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry_temperature: Option<f32>,
    #[serde(default)]
    pub max_validation_retries: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub surface_call_preamble: bool,
    #[serde(default)]
    pub extra_instructions: Option<String>,
    #[serde(default)]
    pub instructions_file: Option<String>,
    #[serde(default = "default_dispatcher")]
    pub dispatcher: String,
}

impl Default for RawDialogue {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            user_name: default_user_name(),
            system_name: default_system_name(),
            call_open: default_call_open(),
            call_close: default_call_close(),
            end_token: None,
            temperature: default_temperature(),
            retry_temperature: None,
            max_validation_retries: 0,
            max_tokens: default_max_tokens(),
            max_rounds: default_max_rounds(),
            debug: false,
            surface_call_preamble: false,
            extra_instructions: None,
            instructions_file: None,
            dispatcher: default_dispatcher(),
        }
    }
}

// ── Plugins ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawPlugins {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub auth_cache: Option<String>,
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

// ── Defaults ────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

pub(super) fn default_bot_name() -> String {
    "parley".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_ws_bind() -> String {
    "127.0.0.1:8001".to_string()
}

pub(super) fn default_llm_provider() -> String {
    "dummy".to_string()
}

pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

pub(super) fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

pub(super) fn default_openai_timeout_seconds() -> u64 {
    60
}

pub(super) fn default_assistant_name() -> String {
    "AI".to_string()
}

pub(super) fn default_user_name() -> String {
    "User".to_string()
}

pub(super) fn default_system_name() -> String {
    "System".to_string()
}

pub(super) fn default_call_open() -> String {
    "<call>".to_string()
}

pub(super) fn default_call_close() -> String {
    "</call>".to_string()
}

pub(super) fn default_temperature() -> f32 {
    0.9
}

pub(super) fn default_max_tokens() -> u32 {
    750
}

pub(super) fn default_max_rounds() -> u32 {
    16
}

pub(super) fn default_dispatcher() -> String {
    "plugins".to_string()
}
