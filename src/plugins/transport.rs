//! Outbound execution of prepared plugin requests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, trace};

use super::RouterError;
use super::request::{PreparedRequest, value_to_string};

/// Enum dispatch, same as the completion providers.
#[derive(Debug, Clone)]
pub enum PluginTransport {
    Http(HttpTransport),
    Scripted(ScriptedTransport),
}

impl PluginTransport {
    pub async fn send(&self, req: &PreparedRequest) -> Result<(u16, String), RouterError> {
        match self {
            PluginTransport::Http(t) => t.send(req).await,
            PluginTransport::Scripted(t) => t.send(req),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// A client with an overall per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, RouterError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouterError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn send(&self, req: &PreparedRequest) -> Result<(u16, String), RouterError> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|e| RouterError::InvalidRequest(format!("invalid method {:?}: {e}", req.method)))?;

        let mut builder = self.client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if !req.params.is_empty() {
            builder = builder.query(&req.params);
        }
        match &req.data {
            Some(Value::Object(form)) => {
                let pairs: Vec<(&str, String)> =
                    form.iter().map(|(k, v)| (k.as_str(), value_to_string(v))).collect();
                builder = builder.form(&pairs);
            }
            Some(other) => builder = builder.body(value_to_string(other)),
            None => {}
        }
        if let Some(json) = &req.json {
            builder = builder.json(json);
        }

        debug!(method = %req.method, url = %req.url, "sending plugin request");
        let response = builder
            .send()
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RouterError::Transport(format!("failed to read response body: {e}")))?;
        trace!(status, body = %text, "plugin response");
        Ok((status, text))
    }
}

/// Canned replies for tests and demos. Every request is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Result<(u16, String), RouterError>>>>,
    sent: Arc<Mutex<Vec<PreparedRequest>>>,
}

impl ScriptedTransport {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let queue = replies.into_iter().map(|(s, b)| Ok((s, b.into()))).collect();
        Self { replies: Arc::new(Mutex::new(queue)), sent: Arc::default() }
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(RouterError::Transport(message.into())));
        }
    }

    pub fn sent(&self) -> Vec<PreparedRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn send(&self, req: &PreparedRequest) -> Result<(u16, String), RouterError> {
        let poisoned = || RouterError::Transport("scripted transport lock poisoned".into());
        self.sent.lock().map_err(|_| poisoned())?.push(req.clone());
        self.replies
            .lock()
            .map_err(|_| poisoned())?
            .pop_front()
            .unwrap_or_else(|| Err(RouterError::Transport("no scripted reply left".into())))
    }
}
