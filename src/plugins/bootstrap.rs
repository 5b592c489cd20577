//! Startup discovery of HTTP plugins.
//!
//! Each configured netloc publishes a manifest at
//! `/.well-known/ai-plugin.json` pointing to its OpenAPI document. Plugins
//! that cannot be loaded are skipped, never fatal.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::error::AppError;

use super::registry::{AuthKind, PluginAuth, PluginDescriptor, PluginRegistry};

const MANIFEST_PATH: &str = "/.well-known/ai-plugin.json";
const MIME_TYPES_JSON: &[&str] = &["application/json"];
const MIME_TYPES_YAML: &[&str] = &[
    "application/yaml",
    "application/x-yaml",
    "text/yaml",
    "text/x-yaml",
];

/// netloc -> resolved auth, persisted between runs.
pub type AuthTable = BTreeMap<String, PluginAuth>;

#[derive(Debug, Deserialize)]
struct Manifest {
    name_for_model: String,
    #[serde(default)]
    name_for_human: String,
    #[serde(default)]
    description_for_human: String,
    #[serde(default)]
    description_for_model: String,
    auth: ManifestAuth,
    api: ManifestApi,
}

#[derive(Debug, Deserialize)]
struct ManifestAuth {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ManifestApi {
    url: String,
}

fn parse_auth_kind(kind: &str) -> Option<AuthKind> {
    match kind {
        "none" => Some(AuthKind::None),
        "service_http" => Some(AuthKind::ServiceHttp),
        "user_http" => Some(AuthKind::UserHttp),
        _ => None,
    }
}

/// Read the auth cache. A missing or unreadable cache is an empty table.
pub fn load_auth_cache(path: &Path) -> AuthTable {
    let Ok(text) = fs::read_to_string(path) else {
        return AuthTable::new();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring unreadable plugin auth cache");
        AuthTable::new()
    })
}

pub fn save_auth_cache(path: &Path, table: &AuthTable) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(table)
        .map_err(|e| AppError::Plugin(format!("cannot serialize auth cache: {e}")))?;
    fs::write(path, text)?;
    Ok(())
}

/// Pick the auth for a plugin: a cached entry of the same kind, else the
/// configured token. `None` means the plugin cannot be used.
fn resolve_auth(
    netloc: &str,
    kind: AuthKind,
    cached: &AuthTable,
    tokens: &HashMap<String, String>,
) -> Option<PluginAuth> {
    if let Some(entry) = cached.get(netloc).filter(|a| a.kind == kind) {
        if kind == AuthKind::None || entry.token.is_some() {
            return Some(entry.clone());
        }
    }
    match kind {
        AuthKind::None => Some(PluginAuth::none()),
        _ => tokens
            .get(netloc)
            .map(|t| PluginAuth { kind, token: Some(t.clone()) }),
    }
}

/// Parse an API document according to its `Content-Type`.
pub fn parse_api_document(content_type: Option<&str>, body: &str) -> Result<Value, String> {
    let content_type = content_type.ok_or("no Content-Type header set")?;
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if MIME_TYPES_JSON.contains(&mime.as_str()) {
        serde_json::from_str(body).map_err(|e| e.to_string())
    } else if MIME_TYPES_YAML.contains(&mime.as_str()) {
        serde_yaml::from_str(body).map_err(|e| e.to_string())
    } else {
        Err(format!("unsupported MIME type: {mime}"))
    }
}

async fn fetch_manifest(client: &Client, netloc: &str) -> Result<Manifest, String> {
    let url = format!("http://{netloc}{MANIFEST_PATH}");
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?;
    response.json::<Manifest>().await.map_err(|e| e.to_string())
}

async fn fetch_api_document(client: &Client, url: &str) -> Result<Value, String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await.map_err(|e| e.to_string())?;
    parse_api_document(content_type.as_deref(), &body)
}

/// Load every reachable plugin from `hosts`.
pub async fn discover(
    hosts: &[String],
    tokens: &HashMap<String, String>,
    auth_cache: Option<&Path>,
    client: &Client,
) -> PluginRegistry {
    let cached = auth_cache.map(load_auth_cache).unwrap_or_default();
    let mut resolved = AuthTable::new();
    let mut registry = PluginRegistry::new();

    info!("loading plugins...");
    for netloc in hosts {
        if resolved.contains_key(netloc) {
            continue;
        }

        let manifest = match fetch_manifest(client, netloc).await {
            Ok(m) => m,
            Err(e) => {
                info!(%netloc, error = %e, "unable to load plugin manifest, skipping");
                continue;
            }
        };

        let Some(kind) = parse_auth_kind(&manifest.auth.kind) else {
            info!(%netloc, auth = %manifest.auth.kind, "plugin declares an unsupported auth type, skipping");
            continue;
        };

        let Some(auth) = resolve_auth(netloc, kind, &cached, tokens) else {
            warn!(%netloc, "plugin requires a token; set [plugins.tokens] for it, skipping");
            continue;
        };
        resolved.insert(netloc.clone(), auth.clone());

        let document = match fetch_api_document(client, &manifest.api.url).await {
            Ok(doc) => doc,
            Err(e) => {
                info!(%netloc, error = %e, "unable to load plugin API document, skipping");
                continue;
            }
        };

        let descriptor = PluginDescriptor::new(manifest.name_for_model, manifest.description_for_model)
            .with_human(manifest.name_for_human, manifest.description_for_human)
            .with_auth(auth)
            .with_api_document(document);
        if registry.insert(descriptor) {
            info!(%netloc, "plugin loaded");
        }
    }

    if let Some(path) = auth_cache {
        if let Err(e) = save_auth_cache(path, &resolved) {
            warn!(path = %path.display(), error = %e, "failed to write plugin auth cache");
        }
    }

    if registry.is_empty() {
        info!("no plugins loaded");
    } else {
        let names: Vec<&str> = registry.iter().map(|p| p.system_name.as_str()).collect();
        info!(plugins = %names.join(", "), "plugins loaded");
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_json_and_yaml_documents() {
        let json = parse_api_document(Some("application/json; charset=utf-8"), r#"{"paths":{}}"#).unwrap();
        assert!(json["paths"].is_object());
        let yaml = parse_api_document(Some("text/yaml"), "openapi: 3.0.1\npaths:\n  /a:\n    get: {}\n").unwrap();
        assert_eq!(yaml["openapi"], "3.0.1");
        assert!(yaml["paths"]["/a"]["get"].is_object());
    }

    #[test]
    fn rejects_unknown_or_missing_mime() {
        assert!(parse_api_document(Some("text/html"), "<html>").unwrap_err().contains("text/html"));
        assert!(parse_api_document(None, "{}").unwrap_err().contains("Content-Type"));
    }

    #[test]
    fn auth_prefers_matching_cache() {
        let mut cached = AuthTable::new();
        cached.insert("h:1".into(), PluginAuth::user_bearer("cached"));
        let tokens = HashMap::from([("h:1".to_string(), "configured".to_string())]);
        let auth = resolve_auth("h:1", AuthKind::UserHttp, &cached, &tokens).unwrap();
        assert_eq!(auth.token.as_deref(), Some("cached"));
    }

    #[test]
    fn auth_kind_change_ignores_cache() {
        let mut cached = AuthTable::new();
        cached.insert("h:1".into(), PluginAuth::none());
        let tokens = HashMap::from([("h:1".to_string(), "configured".to_string())]);
        let auth = resolve_auth("h:1", AuthKind::ServiceHttp, &cached, &tokens).unwrap();
        assert_eq!(auth.kind, AuthKind::ServiceHttp);
        assert_eq!(auth.token.as_deref(), Some("configured"));
    }

    #[test]
    fn http_auth_without_token_is_unusable() {
        assert!(resolve_auth("h:1", AuthKind::UserHttp, &AuthTable::new(), &HashMap::new()).is_none());
        assert!(resolve_auth("h:1", AuthKind::None, &AuthTable::new(), &HashMap::new()).is_some());
    }

    #[test]
    fn auth_cache_round_trip_and_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("auth.json");
        assert!(load_auth_cache(&path).is_empty());

        let mut table = AuthTable::new();
        table.insert("h:1".into(), PluginAuth::user_bearer("t"));
        save_auth_cache(&path, &table).unwrap();
        assert_eq!(load_auth_cache(&path), table);

        std::fs::write(&path, "not json").unwrap();
        assert!(load_auth_cache(&path).is_empty());
    }

    #[tokio::test]
    async fn unreachable_hosts_are_skipped() {
        let client = Client::new();
        let hosts = vec!["127.0.0.1:1".to_string()];
        let registry = discover(&hosts, &HashMap::new(), None, &client).await;
        assert!(registry.is_empty());
    }
}
