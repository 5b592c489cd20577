//! Completion backend abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations. The
//! dialogue engine only ever calls [`LlmProvider::complete`] with a fully
//! rendered transcript; providers never see turn structure.
//!
//! Provider instances are shared immutable capabilities, clone them freely.

pub mod providers;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One raw-text completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// The whole transcript, ending with the assistant's open label.
    pub prompt: String,
    pub max_tokens: u32,
    /// Generation halts before any of these; they are never echoed back.
    pub stop: Vec<String>,
    pub temperature: f32,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Generate a continuation of `request.prompt`.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(request).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(request).await,
            LlmProvider::Scripted(p) => p.complete(request).await,
        }
    }
}
