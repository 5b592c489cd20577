//! Dummy provider: echoes the last prompt line back prefixed with `[echo]`.
//! Used for wiring the full stack without a real API key.

use crate::llm::{CompletionRequest, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        // The prompt ends with the open assistant label, so the user's words
        // sit on the line before it.
        let line = request
            .prompt
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.ends_with(':'))
            .unwrap_or("");
        let said = line.split_once(": ").map(|(_, text)| text).unwrap_or(line);
        Ok(format!("[echo] {said}"))
    }
}
