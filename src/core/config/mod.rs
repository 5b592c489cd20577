//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies the `PARLEY_LOG_LEVEL` env override.
//!
//! # Module layout
//!
//! - **types**: Resolved configuration structs (`Config`, `LlmConfig`,
//!   `DialogueConfig`, `PluginsConfig`, ...).
//! - **raw**: Raw TOML deserialization types with serde defaults; private.
//! - **load**: `merge_toml`, `load_raw_merged`, `load`, `load_from`,
//!   `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    /// Safe `Config` for unit tests: dummy LLM, no plugins, no API keys.
    pub fn test_default() -> Self {
        Self {
            bot_name: "test".into(),
            log_level: "info".into(),
            comms: CommsConfig {
                pty: PtyConfig { enabled: true },
                ws: WsConfig {
                    enabled: false,
                    bind: raw::default_ws_bind(),
                },
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    timeout_seconds: 1,
                },
            },
            dialogue: DialogueConfig {
                assistant_name: raw::default_assistant_name(),
                user_name: raw::default_user_name(),
                system_name: raw::default_system_name(),
                call_open: raw::default_call_open(),
                call_close: raw::default_call_close(),
                end_token: None,
                temperature: raw::default_temperature(),
                retry_temperature: raw::default_temperature(),
                max_validation_retries: 0,
                max_tokens: raw::default_max_tokens(),
                max_rounds: raw::default_max_rounds(),
                debug: false,
                surface_call_preamble: false,
                extra_instructions: None,
                instructions_file: None,
                dispatcher: DispatcherKind::Plugins,
            },
            plugins: PluginsConfig {
                hosts: Vec::new(),
                auth_cache: None,
                tokens: std::collections::HashMap::new(),
            },
            llm_api_key: None,
        }
    }
}
