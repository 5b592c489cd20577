//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies the `PARLEY_LOG_LEVEL` env override.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::AppError;

use super::raw::{RawConfig, RawDialogue};
use super::types::*;

/// Deep-merge two TOML values.
/// Tables are merged recursively; any other overlay value replaces the base
/// value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow its `[meta] base` chain and return the merged
/// value. `visited` holds canonical paths already seen in this chain.
fn load_raw_merged(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&text)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let base_ref = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
        .map(str::to_owned);

    match base_ref {
        Some(base_str) => {
            let base_path = if Path::new(&base_str).is_absolute() {
                PathBuf::from(&base_str)
            } else {
                path.parent().unwrap_or(Path::new(".")).join(&base_str)
            };
            let base_val = load_raw_merged(&base_path, visited)?;
            Ok(merge_toml(base_val, overlay_val))
        }
        None => Ok(overlay_val),
    }
}

/// Load config from the given path, or `config/default.toml`, then apply
/// env overrides. Falls back to the built-in defaults when neither exists.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let log_level_override = env::var("PARLEY_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(Path::new(path), log_level_override.as_deref());
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, log_level_override.as_deref())
    } else {
        resolve(RawConfig::default(), log_level_override.as_deref())
    }
}

/// Load an explicit file. Tests pass the override directly instead of
/// mutating env vars.
pub fn load_from(path: &Path, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(
        |e: toml::de::Error| AppError::Config(format!("config error in {}: {e}", path.display())),
    )?;

    resolve(parsed, log_level_override)
}

fn resolve(parsed: RawConfig, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let log_level = log_level_override.unwrap_or(&parsed.bot.log_level).to_string();

    Ok(Config {
        bot_name: parsed.bot.name,
        log_level,
        comms: CommsConfig {
            pty: PtyConfig {
                enabled: parsed.comms.pty.enabled,
            },
            ws: WsConfig {
                enabled: parsed.comms.ws.enabled,
                bind: parsed.comms.ws.bind,
            },
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        dialogue: resolve_dialogue(parsed.dialogue)?,
        plugins: PluginsConfig {
            hosts: dedup_hosts(parsed.plugins.hosts),
            auth_cache: parsed.plugins.auth_cache.as_deref().map(expand_home),
            tokens: parsed.plugins.tokens,
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
    })
}

fn resolve_dialogue(d: RawDialogue) -> Result<DialogueConfig, AppError> {
    let dispatcher = match d.dispatcher.as_str() {
        "plugins" => DispatcherKind::Plugins,
        "booking" => DispatcherKind::Booking,
        other => {
            return Err(AppError::Config(format!(
                "unknown dialogue dispatcher {other:?} (expected \"plugins\" or \"booking\")"
            )));
        }
    };

    if d.call_open.is_empty() || d.call_close.is_empty() {
        return Err(AppError::Config(
            "dialogue call delimiters must not be empty".into(),
        ));
    }
    if d.max_rounds == 0 {
        return Err(AppError::Config("dialogue max_rounds must be at least 1".into()));
    }

    let end_token = d.end_token.filter(|t| !t.trim().is_empty());

    Ok(DialogueConfig {
        retry_temperature: d.retry_temperature.unwrap_or(d.temperature),
        assistant_name: d.assistant_name,
        user_name: d.user_name,
        system_name: d.system_name,
        call_open: d.call_open,
        call_close: d.call_close,
        end_token,
        temperature: d.temperature,
        max_validation_retries: d.max_validation_retries,
        max_tokens: d.max_tokens,
        max_rounds: d.max_rounds,
        debug: d.debug,
        surface_call_preamble: d.surface_call_preamble,
        extra_instructions: d.extra_instructions,
        instructions_file: d.instructions_file.as_deref().map(expand_home),
        dispatcher,
    })
}

/// Keep the first occurrence of each netloc, preserving order.
fn dedup_hosts(hosts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty() && seen.insert(h.clone()))
        .collect()
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
