//! Session preamble assembly.
//!
//! The preamble is built from layers (extra instructions, an optional
//! instructions file, the call-protocol block) joined by blank lines.
//! Variables use `{{key}}` syntax and are substituted once at
//! [`build()`](PromptBuilder::build) time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::commands::CommandRegistry;
use crate::plugins::PluginRegistry;

use super::transcript::{Delimiters, Names};

const SEPARATOR: &str = "\n\n";

const PLUGIN_TEMPLATE: &str = r#"You can call the following plugin APIs, each described by its OpenAPI document:

{{plugins}}

Use these APIs only when you need what they provide. Do not steer the user towards actions just because an API offers them.

To call an API method, write {{open}}[JSON]{{close}}, where [JSON] is an object with these properties:

- plugin_system_name: the plugin's system name as given above
- request_object_params: the HTTP request to send, with keys among method, url, headers, params, data and json

An example with made-up values:

{{user}}: OK, now add that item to my list.
{{assistant}}: Sure, let me look into that. {{open}}{"plugin_system_name": "test", "request_object_params": {"method": "POST", "url": "https://www.example.com/api/"}}{{close}}
{{system}}: API responded with HTTP status code 200, response body: OK
{{assistant}}: All done!

When several calls are needed, wait for each response before making the next call.

The user cannot see your API calls or any {{system}} responses.

Never disclose implementation details to the user, including which API methods you have or which calls you make."#;

const COMMAND_TEMPLATE: &str = r#"You can run the following commands:

{{commands}}

To run a command, write {{open}}[JSON]{{close}}, where [JSON] is an object with the keys "command" (the command name) and "params" (an object of named parameters). For example:

{{user}}: Can I get a table for two?
{{assistant}}: Let me check that for you. {{open}}{{example}}{{close}}
{{system}}: {{example_result}}
{{assistant}}: You're all set!

Wait for each command's result before running the next one. The user cannot see your commands or any {{system}} responses."#;

/// Fluent builder that assembles a layered prompt.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the contents of `path` as a layer. A missing file is skipped.
    pub fn layer(mut self, path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    self.parts.push(trimmed.to_string());
                }
            }
            Err(_) => {
                tracing::debug!("prompt: layer '{}' not found, skipped", path.display());
            }
        }
        self
    }

    /// Directly append a text fragment. Blank fragments are dropped.
    pub fn append(mut self, text: impl AsRef<str>) -> Self {
        let trimmed = text.as_ref().trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Bind the speaker labels and call delimiters.
    pub fn protocol_vars(self, names: &Names, delimiters: &Delimiters) -> Self {
        self.var("assistant", names.assistant.as_str())
            .var("user", names.user.as_str())
            .var("system", names.system.as_str())
            .var("open", delimiters.open.as_str())
            .var("close", delimiters.close.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Join all layers with blank lines and apply variable substitution.
    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            let placeholder = format!("{{{{{k}}}}}");
            prompt = prompt.replace(&placeholder, v);
        }
        prompt
    }
}

/// Call-protocol block for HTTP plugins; `None` when no plugin is registered.
pub fn plugin_block(registry: &PluginRegistry, names: &Names, delimiters: &Delimiters) -> Option<String> {
    if registry.is_empty() {
        return None;
    }
    let plugins: Vec<String> = registry
        .iter()
        .map(|p| {
            let document = p
                .api_document
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default();
            format!(
                "plugin_human_name: {}\nplugin_human_description: {}\nplugin_system_name: {}\n{}\n{}",
                p.human_name, p.human_description, p.system_name, p.description_for_model, document
            )
        })
        .collect();

    // Plugin text is substituted last so that braces inside API documents
    // are never mistaken for template variables.
    let block = PromptBuilder::new()
        .append(PLUGIN_TEMPLATE)
        .protocol_vars(names, delimiters)
        .build();
    Some(block.replace("{{plugins}}", &plugins.join(SEPARATOR)))
}

/// Call-protocol block for local commands; `None` when none is registered.
pub fn command_block(registry: &CommandRegistry, names: &Names, delimiters: &Delimiters) -> Option<String> {
    let first = registry.iter().next()?;
    let commands: Vec<String> = registry
        .iter()
        .map(|c| {
            let example = serde_json::json!({"command": c.name(), "params": c.example_params()});
            format!("- {}: {}. Example: {}{}{}", c.name(), c.description(), delimiters.open, example, delimiters.close)
        })
        .collect();
    let example = serde_json::json!({"command": first.name(), "params": first.example_params()});

    Some(
        PromptBuilder::new()
            .append(COMMAND_TEMPLATE)
            .protocol_vars(names, delimiters)
            .var("example_result", "Done.")
            .build()
            .replace("{{example}}", &example.to_string())
            .replace("{{commands}}", &commands.join("\n")),
    )
}

/// `blocks` joined by blank lines, with a trailing newline.
pub fn initial_prompt(blocks: impl IntoIterator<Item = String>) -> String {
    let body = blocks
        .into_iter()
        .fold(PromptBuilder::new(), |b, block| b.append(block))
        .build();
    format!("{body}\n")
}
