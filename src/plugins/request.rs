//! Transport-ready HTTP request built from a model's call parameters.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::dialogue::extract::RequestParams;

use super::RouterError;

/// A normalized outbound request. Header and query values are strings;
/// `data` is a form (object) or raw body (anything else), `json` a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub data: Option<Value>,
    pub json: Option<Value>,
}

impl PreparedRequest {
    pub fn from_params(params: RequestParams) -> Result<Self, RouterError> {
        let method = params
            .method
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| RouterError::InvalidRequest("missing request method".into()))?;
        if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(RouterError::InvalidRequest(format!("invalid method {method:?}")));
        }

        let url = params
            .url
            .ok_or_else(|| RouterError::InvalidRequest("missing request url".into()))?;
        let parsed = Url::parse(&url)
            .map_err(|e| RouterError::InvalidRequest(format!("invalid url {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RouterError::InvalidRequest(format!(
                "unsupported url scheme {:?}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            method,
            url,
            headers: stringify(params.headers),
            params: stringify(params.params),
            data: params.data.filter(|v| !v.is_null()),
            json: params.json.filter(|v| !v.is_null()),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query value from `params` or the URL's own query string.
    pub fn has_query_param(&self, name: &str) -> bool {
        if self.params.contains_key(name) {
            return true;
        }
        Url::parse(&self.url)
            .map(|u| u.query_pairs().any(|(k, _)| k == name))
            .unwrap_or(false)
    }

    pub fn has_body(&self) -> bool {
        self.data.is_some() || self.json.is_some()
    }
}

/// Render a scalar the way it would appear on the wire.
pub(crate) fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stringify(map: Option<Map<String, Value>>) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let s = value_to_string(&v);
            (k, s)
        })
        .collect()
}
