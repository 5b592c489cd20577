//! Request validation against a plugin's OpenAPI document.
//!
//! Covers what a model can get wrong in a call: the path, the method,
//! required query/header parameters and the JSON body shape. Response
//! schemas are ignored.

use reqwest::Url;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::request::PreparedRequest;

const MAX_REF_DEPTH: usize = 32;
const METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

#[derive(Debug, Error, PartialEq)]
pub enum OpenApiError {
    #[error("not an OpenAPI document: {0}")]
    NotOpenApi(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct Route {
    template: String,
    segments: Vec<Segment>,
    path_item: Value,
}

impl Route {
    fn matches(&self, parts: &[&str]) -> bool {
        self.segments.len() == parts.len()
            && self.segments.iter().zip(parts).all(|(seg, part)| match seg {
                Segment::Literal(lit) => lit == part,
                Segment::Param => !part.is_empty(),
            })
    }

    fn param_count(&self) -> usize {
        self.segments.iter().filter(|s| **s == Segment::Param).count()
    }
}

/// Compiled view of one OpenAPI document.
#[derive(Debug, Clone)]
pub struct ApiSchema {
    document: Value,
    servers: Vec<Server>,
    routes: Vec<Route>,
}

/// One `servers[]` entry. `origin` is `None` for a relative server URL,
/// which accepts any host.
#[derive(Debug, Clone, PartialEq)]
struct Server {
    origin: Option<String>,
    base_path: String,
}

impl ApiSchema {
    pub fn from_document(document: Value) -> Result<Self, OpenApiError> {
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .ok_or(OpenApiError::NotOpenApi("missing `paths` object"))?;

        let mut routes: Vec<Route> = paths
            .iter()
            .map(|(template, item)| Route {
                template: template.clone(),
                segments: split_path(template)
                    .into_iter()
                    .map(|s| {
                        if s.starts_with('{') && s.ends_with('}') {
                            Segment::Param
                        } else {
                            Segment::Literal(s.to_string())
                        }
                    })
                    .collect(),
                path_item: item.clone(),
            })
            .collect();
        // Concrete paths win over templated ones.
        routes.sort_by_key(Route::param_count);

        let servers = document
            .get("servers")
            .and_then(Value::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|s| s.get("url").and_then(Value::as_str))
                    .map(parse_server)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self { document, servers, routes })
    }

    /// The document as fetched.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Check `req` against the document, returning every violation found.
    pub fn validate(&self, req: &PreparedRequest) -> Result<(), String> {
        let url = Url::parse(&req.url).map_err(|e| format!("invalid url: {e}"))?;
        let rel = self.relative_path(&url)?;

        let parts = split_path(rel);
        let route = self
            .routes
            .iter()
            .find(|r| r.matches(&parts))
            .ok_or_else(|| format!("no API path matches {rel}"))?;

        let method = req.method.to_ascii_lowercase();
        let operation = route
            .path_item
            .get(&method)
            .filter(|op| op.is_object())
            .ok_or_else(|| {
                let allowed: Vec<String> = METHODS
                    .iter()
                    .filter(|m| route.path_item.get(**m).is_some())
                    .map(|m| m.to_ascii_uppercase())
                    .collect();
                format!(
                    "method {} is not allowed on {} (allowed: {})",
                    req.method,
                    route.template,
                    allowed.join(", ")
                )
            })?;

        let mut violations = Vec::new();
        self.check_parameters(route, operation, req, &mut violations);
        self.check_body(operation, req, &mut violations);

        if violations.is_empty() {
            debug!(path = %route.template, method = %req.method, "request matches API schema");
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }

    /// The request path below the first server whose origin and base path
    /// both match. No `servers` means any origin and no base path.
    fn relative_path<'a>(&self, url: &'a Url) -> Result<&'a str, String> {
        let path = url.path();
        if self.servers.is_empty() {
            return Ok(path);
        }
        let origin = origin_of(url);
        let mut known_origin = false;
        for server in &self.servers {
            if server.origin.is_some() && server.origin != origin {
                continue;
            }
            known_origin = true;
            if let Some(rest) = path.strip_prefix(server.base_path.as_str()) {
                if rest.is_empty() {
                    return Ok("/");
                }
                if rest.starts_with('/') {
                    return Ok(rest);
                }
            }
        }
        if known_origin {
            Err(format!("path {path} is outside the API base path"))
        } else {
            Err(format!(
                "host {} is not a server of this API",
                origin.as_deref().unwrap_or("(none)")
            ))
        }
    }

    fn check_parameters(
        &self,
        route: &Route,
        operation: &Value,
        req: &PreparedRequest,
        violations: &mut Vec<String>,
    ) {
        let declared = [route.path_item.get("parameters"), operation.get("parameters")];
        for param in declared
            .into_iter()
            .flatten()
            .filter_map(Value::as_array)
            .flatten()
        {
            let param = self.resolve(param);
            let required = param.get("required").and_then(Value::as_bool).unwrap_or(false);
            if !required {
                continue;
            }
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            match param.get("in").and_then(Value::as_str) {
                Some("query") if !req.has_query_param(name) => {
                    violations.push(format!("missing required query parameter `{name}`"));
                }
                Some("header") if req.header(name).is_none() => {
                    violations.push(format!("missing required header `{name}`"));
                }
                _ => {}
            }
        }
    }

    fn check_body(&self, operation: &Value, req: &PreparedRequest, violations: &mut Vec<String>) {
        let Some(body) = operation.get("requestBody").map(|b| self.resolve(b)) else {
            return;
        };
        let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
        if required && !req.has_body() {
            violations.push("request body is required".to_string());
            return;
        }

        let (Some(json), Some(schema)) = (
            req.json.as_ref(),
            body.pointer("/content/application~1json/schema"),
        ) else {
            return;
        };

        let schema = self.inline_refs(schema, 0);
        match jsonschema::validator_for(&schema) {
            Ok(validator) => violations.extend(
                validator
                    .iter_errors(json)
                    .map(|e| format!("body{}: {}", e.instance_path, e)),
            ),
            Err(e) => debug!(error = %e, "skipping body validation: unusable schema"),
        }
    }

    /// Follow a local `$ref` (one hop chain, bounded).
    fn resolve<'a>(&'a self, value: &'a Value) -> &'a Value {
        let mut current = value;
        for _ in 0..MAX_REF_DEPTH {
            match current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| self.lookup(r))
            {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    fn lookup(&self, reference: &str) -> Option<&Value> {
        reference.strip_prefix('#').and_then(|p| self.document.pointer(p))
    }

    /// Copy `schema` with every local `$ref` replaced by its target, so the
    /// validator sees a self-contained schema.
    fn inline_refs(&self, schema: &Value, depth: usize) -> Value {
        if depth >= MAX_REF_DEPTH {
            return Value::Object(Map::new());
        }
        match schema {
            Value::Object(obj) => {
                if let Some(target) = obj.get("$ref").and_then(Value::as_str).and_then(|r| self.lookup(r)) {
                    return self.inline_refs(target, depth + 1);
                }
                Value::Object(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), self.inline_refs(v, depth + 1)))
                        .collect(),
                )
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.inline_refs(v, depth + 1)).collect())
            }
            other => other.clone(),
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// `scheme://host:port`, with the scheme's default port filled in.
fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let port = url.port_or_known_default()?;
    Some(format!("{}://{host}:{port}", url.scheme()))
}

/// `https://host/api/v1/` -> origin `https://host:443`, base `/api/v1`;
/// `/api` -> no origin, base `/api`.
fn parse_server(server_url: &str) -> Server {
    match Url::parse(server_url) {
        Ok(u) => Server {
            origin: origin_of(&u),
            base_path: u.path().trim_end_matches('/').to_string(),
        },
        Err(_) => Server {
            origin: None,
            base_path: server_url.trim_end_matches('/').to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::extract::RequestParams;
    use serde_json::json;

    fn todo_api() -> ApiSchema {
        ApiSchema::from_document(json!({
            "openapi": "3.0.1",
            "servers": [{"url": "http://localhost:5003/api"}],
            "paths": {
                "/todos/{username}": {
                    "parameters": [{"$ref": "#/components/parameters/Username"}],
                    "get": {"parameters": [
                        {"name": "limit", "in": "query", "required": true, "schema": {"type": "integer"}}
                    ]},
                    "post": {"requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/AddTodo"}}}
                    }}
                },
                "/todos/all": {
                    "delete": {"parameters": [
                        {"name": "X-Confirm", "in": "header", "required": true}
                    ]}
                }
            },
            "components": {
                "parameters": {
                    "Username": {"name": "username", "in": "path", "required": true}
                },
                "schemas": {
                    "AddTodo": {
                        "type": "object",
                        "required": ["todo"],
                        "properties": {"todo": {"type": "string"}}
                    }
                }
            }
        }))
        .unwrap()
    }

    fn req(v: Value) -> PreparedRequest {
        let params: RequestParams = serde_json::from_value(v).unwrap();
        PreparedRequest::from_params(params).unwrap()
    }

    #[test]
    fn rejects_non_openapi() {
        assert!(ApiSchema::from_document(json!({"hello": "world"})).is_err());
    }

    #[test]
    fn accepts_valid_get() {
        let r = req(json!({"method": "GET", "url": "http://localhost:5003/api/todos/bob", "params": {"limit": 3}}));
        assert_eq!(todo_api().validate(&r), Ok(()));
    }

    #[test]
    fn missing_required_query() {
        let r = req(json!({"method": "GET", "url": "http://localhost:5003/api/todos/bob"}));
        let err = todo_api().validate(&r).unwrap_err();
        assert!(err.contains("limit"));
    }

    #[test]
    fn query_in_url_counts() {
        let r = req(json!({"method": "GET", "url": "http://localhost:5003/api/todos/bob?limit=1"}));
        assert!(todo_api().validate(&r).is_ok());
    }

    #[test]
    fn unknown_path() {
        let r = req(json!({"method": "GET", "url": "http://localhost:5003/api/lists"}));
        assert!(todo_api().validate(&r).unwrap_err().contains("no API path"));
    }

    #[test]
    fn outside_base_path() {
        let r = req(json!({"method": "GET", "url": "http://localhost:5003/todos/bob"}));
        assert!(todo_api().validate(&r).unwrap_err().contains("base path"));
    }

    #[test]
    fn foreign_host_rejected() {
        let r = req(json!({"method": "GET", "url": "http://attacker.example/api/todos/bob?limit=1"}));
        let err = todo_api().validate(&r).unwrap_err();
        assert!(err.contains("attacker.example"), "got: {err}");
    }

    #[test]
    fn foreign_port_and_scheme_rejected() {
        let port = req(json!({"method": "GET", "url": "http://localhost:9999/api/todos/bob?limit=1"}));
        assert!(todo_api().validate(&port).unwrap_err().contains("not a server"));
        let scheme = req(json!({"method": "GET", "url": "https://localhost:5003/api/todos/bob?limit=1"}));
        assert!(todo_api().validate(&scheme).is_err());
    }

    #[test]
    fn default_port_matches_explicit_port() {
        let api = ApiSchema::from_document(json!({
            "servers": [{"url": "https://plugin.example/"}],
            "paths": {"/items": {"get": {}}}
        }))
        .unwrap();
        let r = req(json!({"method": "GET", "url": "https://PLUGIN.example:443/items"}));
        assert_eq!(api.validate(&r), Ok(()));
    }

    #[test]
    fn relative_server_accepts_any_host() {
        let api = ApiSchema::from_document(json!({
            "servers": [{"url": "/v1"}],
            "paths": {"/items": {"get": {}}}
        }))
        .unwrap();
        let r = req(json!({"method": "GET", "url": "http://anywhere:8080/v1/items"}));
        assert_eq!(api.validate(&r), Ok(()));
    }

    #[test]
    fn wrong_method_lists_allowed() {
        let r = req(json!({"method": "PATCH", "url": "http://localhost:5003/api/todos/bob"}));
        let err = todo_api().validate(&r).unwrap_err();
        assert!(err.contains("PATCH"));
        assert!(err.contains("GET, POST"));
    }

    #[test]
    fn literal_route_beats_template() {
        let r = req(json!({
            "method": "DELETE",
            "url": "http://localhost:5003/api/todos/all",
            "headers": {"x-confirm": "yes"}
        }));
        assert!(todo_api().validate(&r).is_ok());
    }

    #[test]
    fn missing_required_header() {
        let r = req(json!({"method": "DELETE", "url": "http://localhost:5003/api/todos/all"}));
        assert!(todo_api().validate(&r).unwrap_err().contains("X-Confirm"));
    }

    #[test]
    fn required_body_missing() {
        let r = req(json!({"method": "POST", "url": "http://localhost:5003/api/todos/bob"}));
        assert!(todo_api().validate(&r).unwrap_err().contains("body is required"));
    }

    #[test]
    fn body_schema_violation() {
        let r = req(json!({
            "method": "POST",
            "url": "http://localhost:5003/api/todos/bob",
            "json": {"todo": 42}
        }));
        let err = todo_api().validate(&r).unwrap_err();
        assert!(err.contains("body/todo"), "got: {err}");
    }

    #[test]
    fn body_schema_ok() {
        let r = req(json!({
            "method": "POST",
            "url": "http://localhost:5003/api/todos/bob",
            "json": {"todo": "buy milk"}
        }));
        assert!(todo_api().validate(&r).is_ok());
    }

    #[test]
    fn no_servers_means_root() {
        let api = ApiSchema::from_document(json!({"paths": {"/ping": {"get": {}}}})).unwrap();
        let r = req(json!({"method": "GET", "url": "https://anywhere.example/ping"}));
        assert!(api.validate(&r).is_ok());
    }

    #[test]
    fn self_referencing_schema_terminates() {
        let api = ApiSchema::from_document(json!({
            "paths": {"/n": {"post": {"requestBody": {"content": {"application/json": {
                "schema": {"$ref": "#/components/schemas/Node"}
            }}}}}},
            "components": {"schemas": {"Node": {
                "type": "object",
                "properties": {"next": {"$ref": "#/components/schemas/Node"}}
            }}}
        }))
        .unwrap();
        let r = req(json!({"method": "POST", "url": "http://h/n", "json": {"next": {}}}));
        assert!(api.validate(&r).is_ok());
    }
}
