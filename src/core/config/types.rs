//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs the rest of the crate
//! consumes. Raw TOML deserialization types live in `raw.rs`.

use std::collections::HashMap;
use std::path::PathBuf;

// ── Comms ───────────────────────────────────────────────────────────────────

/// Console channel configuration.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Whether the console channel is enabled (still requires `-i`).
    pub enabled: bool,
}

/// WebSocket channel configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub enabled: bool,
    /// Socket address to bind the listener to.
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub pty: PtyConfig,
    pub ws: WsConfig,
}

// ── LLM ──────────────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    pub provider: String,
    pub openai: OpenAiConfig,
}

// ── Dialogue ─────────────────────────────────────────────────────────────────

/// Which backend answers embedded calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherKind {
    /// HTTP plugins discovered from `[plugins] hosts`.
    Plugins,
    /// The built-in table-booking command backend.
    Booking,
}

/// Dialogue engine knobs (`[dialogue]`).
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub assistant_name: String,
    pub user_name: String,
    pub system_name: String,
    pub call_open: String,
    pub call_close: String,
    pub end_token: Option<String>,
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_validation_retries: u32,
    pub max_tokens: u32,
    /// Hard cap on completion requests per user submission.
    pub max_rounds: u32,
    /// Emit raw model output and call results to the caller.
    pub debug: bool,
    /// Emit the plain text preceding a call as a user-visible utterance.
    pub surface_call_preamble: bool,
    pub extra_instructions: Option<String>,
    /// File whose contents are appended to the extra instructions.
    pub instructions_file: Option<PathBuf>,
    pub dispatcher: DispatcherKind,
}

// ── Plugins ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PluginsConfig {
    /// Plugin netlocs (`host:port`) to discover at startup.
    pub hosts: Vec<String>,
    /// JSON file caching resolved plugin auth (already expanded, no `~`).
    pub auth_cache: Option<PathBuf>,
    /// netloc -> bearer token for plugins declaring HTTP auth.
    pub tokens: HashMap<String, String>,
}

// ── Config (root) ────────────────────────────────────────────────────────────

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    pub log_level: String,
    pub comms: CommsConfig,
    pub llm: LlmConfig,
    pub dialogue: DialogueConfig,
    pub plugins: PluginsConfig,
    /// API key from `LLM_API_KEY` env var, never sourced from TOML.
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Returns `true` if the console channel should be loaded.
    pub fn comms_pty_should_load(&self) -> bool {
        self.comms.pty.enabled
    }

    /// Returns `true` if the WebSocket channel should be loaded.
    pub fn comms_ws_should_load(&self) -> bool {
        self.comms.ws.enabled
    }
}
