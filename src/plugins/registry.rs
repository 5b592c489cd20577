//! Immutable table of callable plugins, keyed by system name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::openapi::ApiSchema;

/// How a plugin authenticates callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    /// The plugin issued one token for this service; we never forward it.
    ServiceHttp,
    /// A per-user bearer token injected into every request.
    UserHttp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAuth {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl PluginAuth {
    pub fn none() -> Self {
        Self { kind: AuthKind::None, token: None }
    }

    pub fn user_bearer(token: impl Into<String>) -> Self {
        Self { kind: AuthKind::UserHttp, token: Some(token.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub system_name: String,
    pub human_name: String,
    pub human_description: String,
    pub description_for_model: String,
    /// The API document as published, shown to the model verbatim.
    pub api_document: Option<Value>,
    /// Present only when the document is usable for validation.
    pub api_schema: Option<ApiSchema>,
    pub auth: PluginAuth,
}

impl PluginDescriptor {
    pub fn new(system_name: impl Into<String>, description_for_model: impl Into<String>) -> Self {
        let system_name = system_name.into();
        Self {
            human_name: system_name.clone(),
            human_description: String::new(),
            system_name,
            description_for_model: description_for_model.into(),
            api_document: None,
            api_schema: None,
            auth: PluginAuth::none(),
        }
    }

    pub fn with_human(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.human_name = name.into();
        self.human_description = description.into();
        self
    }

    pub fn with_auth(mut self, auth: PluginAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Attach an API document. A document that is not usable OpenAPI is
    /// still shown to the model, but calls go unvalidated.
    pub fn with_api_document(mut self, document: Value) -> Self {
        self.api_schema = match ApiSchema::from_document(document.clone()) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(plugin = %self.system_name, error = %e, "calls to plugin will not be validated");
                None
            }
        };
        self.api_document = Some(document);
        self
    }
}

/// Built once at startup, shared read-only by every session.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Returns `false` (and keeps the existing entry) when the
    /// system name is already taken.
    pub fn insert(&mut self, descriptor: PluginDescriptor) -> bool {
        if self.plugins.contains_key(&descriptor.system_name) {
            warn!(plugin = %descriptor.system_name, "duplicate plugin name ignored");
            return false;
        }
        self.plugins.insert(descriptor.system_name.clone(), descriptor);
        true
    }

    pub fn get(&self, system_name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(system_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl FromIterator<PluginDescriptor> for PluginRegistry {
    fn from_iter<I: IntoIterator<Item = PluginDescriptor>>(iter: I) -> Self {
        let mut registry = Self::new();
        for d in iter {
            registry.insert(d);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_names_keep_first() {
        let mut r = PluginRegistry::new();
        assert!(r.insert(PluginDescriptor::new("todo", "first")));
        assert!(!r.insert(PluginDescriptor::new("todo", "second")));
        assert_eq!(r.len(), 1);
        assert_eq!(r.get("todo").unwrap().description_for_model, "first");
    }

    #[test]
    fn iteration_is_sorted_by_name() {
        let r: PluginRegistry = ["weather", "calendar", "todo"]
            .into_iter()
            .map(|n| PluginDescriptor::new(n, ""))
            .collect();
        let names: Vec<_> = r.iter().map(|d| d.system_name.as_str()).collect();
        assert_eq!(names, vec!["calendar", "todo", "weather"]);
    }

    #[test]
    fn unusable_document_is_kept_unvalidated() {
        let d = PluginDescriptor::new("x", "").with_api_document(json!({"not": "openapi"}));
        assert!(d.api_document.is_some());
        assert!(d.api_schema.is_none());
    }

    #[test]
    fn auth_kind_wire_names() {
        let auth: PluginAuth = serde_json::from_value(json!({"type": "user_http", "token": "t"})).unwrap();
        assert_eq!(auth, PluginAuth::user_bearer("t"));
        let v = serde_json::to_value(PluginAuth::none()).unwrap();
        assert_eq!(v, json!({"type": "none"}));
    }
}
