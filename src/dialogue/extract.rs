//! Splitting raw model output into plain text and an embedded call.
//!
//! The closing delimiter is a stop sequence, so a call payload arrives
//! unterminated: everything after the opening delimiter is payload.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::transcript::Delimiters;

#[derive(Debug, Error, PartialEq)]
pub enum CallPayloadError {
    #[error("Malformed JSON: {0:?}")]
    Malformed(String),
    #[error("invalid call: {0}")]
    Shape(String),
}

/// Result of splitting one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<'a> {
    /// Text before the opening delimiter (or all of it), unstripped.
    pub prefix: &'a str,
    /// Everything after the first opening delimiter.
    pub payload: Option<&'a str>,
}

pub fn split_call<'a>(text: &'a str, delimiters: &Delimiters) -> Extraction<'a> {
    match text.find(&delimiters.open) {
        Some(pos) => Extraction {
            prefix: &text[..pos],
            payload: Some(&text[pos + delimiters.open.len()..]),
        },
        None => Extraction { prefix: text, payload: None },
    }
}

/// A JSON value decoded from the head of a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub value: Value,
    /// Bytes of the payload the value occupied (leading whitespace included).
    pub consumed: usize,
}

/// Decode one JSON value from the start of `payload`, ignoring whatever the
/// model over-generated after it.
pub fn decode_payload(payload: &str) -> Result<DecodedPayload, CallPayloadError> {
    let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(DecodedPayload { value, consumed: stream.byte_offset() }),
        _ => Err(CallPayloadError::Malformed(payload.to_string())),
    }
}

/// Drop the trailing bytes of `utterance` that the decoder did not consume.
/// `utterance` must end with the payload it was decoded from.
pub fn truncate_to_consumed<'a>(utterance: &'a str, payload: &str, consumed: usize) -> &'a str {
    let extra = payload.len().saturating_sub(consumed);
    &utterance[..utterance.len().saturating_sub(extra)]
}

/// HTTP request fields as the model writes them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub json: Option<Value>,
}

/// `{"plugin_system_name": ..., "request_object_params": {...}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginCall {
    pub plugin_system_name: String,
    pub request_object_params: RequestParams,
}

/// `{"command": ..., "params": {...}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandCall {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub fn parse_plugin_call(value: &Value) -> Result<PluginCall, CallPayloadError> {
    PluginCall::deserialize(value).map_err(|e| CallPayloadError::Shape(e.to_string()))
}

pub fn parse_command_call(value: &Value) -> Result<CommandCall, CallPayloadError> {
    CommandCall::deserialize(value).map_err(|e| CallPayloadError::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_delimiter_is_all_prefix() {
        let e = split_call("Just chatting.", &Delimiters::default());
        assert_eq!(e.prefix, "Just chatting.");
        assert!(e.payload.is_none());
    }

    #[test]
    fn first_delimiter_splits() {
        let e = split_call("Sure! <call>{\"a\":1}<call>x", &Delimiters::default());
        assert_eq!(e.prefix, "Sure! ");
        assert_eq!(e.payload, Some("{\"a\":1}<call>x"));
    }

    #[test]
    fn empty_payload_after_delimiter() {
        let e = split_call("<call>", &Delimiters::default());
        assert_eq!(e.prefix, "");
        assert_eq!(e.payload, Some(""));
        assert!(decode_payload("").is_err());
    }

    #[test]
    fn custom_delimiters() {
        let d = Delimiters { open: "[json]".into(), close: "[/json]".into() };
        let e = split_call("ok [json]{}", &d);
        assert_eq!(e.payload, Some("{}"));
    }

    #[test]
    fn decode_ignores_trailing_garbage() {
        let payload = r#"{"plugin_system_name":"x","request_object_params":{"method":"GET","url":"http://a"}}extra-garbage"#;
        let d = decode_payload(payload).unwrap();
        assert_eq!(d.consumed, payload.len() - "extra-garbage".len());
        assert_eq!(d.value["plugin_system_name"], "x");
    }

    #[test]
    fn truncation_keeps_json_span() {
        let utterance = r#"Sure! <call>{"a":1}extra-garbage"#;
        let payload = r#"{"a":1}extra-garbage"#;
        let d = decode_payload(payload).unwrap();
        assert_eq!(truncate_to_consumed(utterance, payload, d.consumed), r#"Sure! <call>{"a":1}"#);
    }

    #[test]
    fn decode_counts_leading_whitespace() {
        let payload = "  {\"a\": 1}  ";
        let d = decode_payload(payload).unwrap();
        assert_eq!(&payload[..d.consumed], "  {\"a\": 1}");
    }

    #[test]
    fn truncated_json_is_malformed() {
        let err = decode_payload("{\"plugin_system_name\": \"x\"").unwrap_err();
        assert!(matches!(err, CallPayloadError::Malformed(_)));
        assert!(err.to_string().starts_with("Malformed JSON"));
    }

    #[test]
    fn plugin_call_shape() {
        let v = json!({
            "plugin_system_name": "todo",
            "request_object_params": {"method": "POST", "url": "http://h/todos", "json": {"t": 1}}
        });
        let call = parse_plugin_call(&v).unwrap();
        assert_eq!(call.plugin_system_name, "todo");
        assert_eq!(call.request_object_params.method.as_deref(), Some("POST"));
        assert_eq!(call.request_object_params.json, Some(json!({"t": 1})));
    }

    #[test]
    fn plugin_call_missing_key() {
        let err = parse_plugin_call(&json!({"plugin_system_name": "todo"})).unwrap_err();
        assert!(err.to_string().contains("request_object_params"));
    }

    #[test]
    fn command_call_defaults_params() {
        let call = parse_command_call(&json!({"command": "cancel_booking"})).unwrap();
        assert_eq!(call.command, "cancel_booking");
        assert!(call.params.is_empty());
    }
}
