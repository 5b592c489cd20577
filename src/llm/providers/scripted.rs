//! Scripted provider: replays a queue of canned completions.
//!
//! Every request is recorded so tests can assert on the exact prompt, stop
//! sequences and temperature the engine produced. An exhausted script is a
//! `ProviderError`, which surfaces a runaway loop instead of hanging.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::llm::{CompletionRequest, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// A provider that answers with `replies` in order.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = replies.into_iter().map(|r| Ok(r.into())).collect();
        Self {
            replies: Arc::new(Mutex::new(queue)),
            requests: Arc::default(),
        }
    }

    /// Queue one more reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    /// Queue a backend failure.
    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(ProviderError::Request(message.into())));
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests
            .lock()
            .map_err(|_| ProviderError::Request("scripted provider lock poisoned".into()))?
            .push(request.clone());

        self.replies
            .lock()
            .map_err(|_| ProviderError::Request("scripted provider lock poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Request("script exhausted".into())))
    }
}
