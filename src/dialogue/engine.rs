//! The dialogue state machine.
//!
//! A [`DialogueEngine`] owns one transcript and drives the reply cycle:
//! complete, extract, dispatch, record the result and re-prompt, until the
//! model answers without a call or ends the session.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, LlmProvider, ProviderError};

use super::dispatch::{CallDispatcher, DispatchError, PreparedCall};
use super::events::{EventSink, SessionState};
use super::extract::{decode_payload, split_call, truncate_to_consumed};
use super::prompt;
use super::settings::{DialogueSettings, SettingsError};
use super::transcript::{Speaker, Transcript};

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("invalid session state: input is accepted only while listening (state: {0})")]
    InvalidSessionState(SessionState),
    #[error("completion backend error: {0}")]
    Backend(#[from] ProviderError),
    #[error("reply cycle exceeded {0} completion requests")]
    RoundLimitExceeded(u32),
}

/// How one completion is to be handled.
enum Reply {
    /// No call: the cycle ends here.
    Final { text: String, ended: bool },
    Call {
        /// Assistant turn text, truncated to the decoded payload and closed.
        recorded: String,
        /// Plain text before the opening delimiter.
        preamble: String,
        prepared: Result<PreparedCall, DispatchError>,
    },
}

pub struct DialogueEngine {
    provider: LlmProvider,
    dispatcher: CallDispatcher,
    settings: DialogueSettings,
    transcript: Transcript,
    state: SessionState,
    events: EventSink,
}

impl DialogueEngine {
    /// A fresh session in `Listening`, seeded with the preamble. `settings`
    /// must already be validated; sessions are opened through
    /// [`SessionFactory`].
    pub(crate) fn new(
        provider: LlmProvider,
        dispatcher: CallDispatcher,
        settings: DialogueSettings,
        events: EventSink,
    ) -> Self {
        let blocks = settings
            .extra_instructions
            .iter()
            .cloned()
            .chain(dispatcher.prompt_block(&settings.names, &settings.delimiters));
        let preamble = prompt::initial_prompt(blocks);
        debug!(preamble = %preamble, "session created");

        Self {
            transcript: Transcript::new(preamble, settings.names.clone()),
            provider,
            dispatcher,
            settings,
            state: SessionState::Listening,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    /// Feed user input and run the reply cycle to completion.
    ///
    /// Returns the state the session settled in. On a backend error the
    /// session is left in `Replying` and should be discarded. Dropping the
    /// returned future mid-cycle has the same effect.
    pub async fn submit<I, S>(&mut self, texts: I) -> Result<SessionState, DialogueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.state != SessionState::Listening {
            return Err(DialogueError::InvalidSessionState(self.state));
        }

        for text in texts {
            self.transcript.push(Speaker::User, text.as_ref().trim());
        }
        self.set_state(SessionState::Replying);

        match self.reply_cycle().await {
            Ok(ended) => {
                let next = if ended { SessionState::Ended } else { SessionState::Listening };
                self.set_state(next);
                Ok(next)
            }
            Err(DialogueError::RoundLimitExceeded(limit)) => {
                warn!(limit, "reply cycle hit the round limit");
                self.set_state(SessionState::Listening);
                Err(DialogueError::RoundLimitExceeded(limit))
            }
            Err(e) => Err(e),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "session state");
        }
        self.state = state;
        self.events.state(state);
    }

    /// Returns `true` when the model ended the session.
    async fn reply_cycle(&mut self) -> Result<bool, DialogueError> {
        let mut requests = 0u32;

        loop {
            let mut attempt = 0u32;
            let reply = loop {
                if requests >= self.settings.max_rounds {
                    return Err(DialogueError::RoundLimitExceeded(self.settings.max_rounds));
                }
                requests += 1;

                let temperature = if attempt == 0 {
                    self.settings.temperature
                } else {
                    self.settings.retry_temperature
                };
                let raw = self.complete(temperature).await?;
                let reply = self.interpret(&raw);

                let rejection = match &reply {
                    Reply::Call { prepared: Err(e), .. } => Some(e.to_string()),
                    _ => None,
                };
                if let Some(error) = rejection {
                    warn!(attempt, %error, "rejected call");
                    if attempt < self.settings.max_validation_retries {
                        // Only the last attempt reaches the transcript.
                        if self.settings.debug {
                            self.events.utterance(error, true);
                        }
                        attempt += 1;
                        continue;
                    }
                }
                break reply;
            };

            match reply {
                Reply::Final { text, ended } => {
                    if !text.is_empty() && !self.settings.debug {
                        self.events.utterance(text.as_str(), false);
                    }
                    self.transcript.push(Speaker::Assistant, text);
                    if ended {
                        info!("session ended by the model");
                    }
                    return Ok(ended);
                }
                Reply::Call { recorded, preamble, prepared } => {
                    if self.settings.surface_call_preamble && !self.settings.debug && !preamble.is_empty() {
                        self.events.utterance(preamble, false);
                    }
                    self.transcript.push(Speaker::Assistant, recorded);

                    let result = match prepared {
                        Ok(call) => self.dispatcher.execute(call).await,
                        Err(e) => e.to_string(),
                    };
                    if self.settings.debug {
                        self.events.utterance(result.as_str(), true);
                    }
                    self.transcript.push(Speaker::System, result);
                }
            }
        }
    }

    async fn complete(&self, temperature: f32) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            prompt: self.transcript.completion_prompt(),
            max_tokens: self.settings.max_tokens,
            stop: self.transcript.stop_sequences(&self.settings.delimiters),
            temperature,
        };
        let raw = self.provider.complete(&request).await?;
        let raw = raw.trim().to_string();
        debug!(utterance = %raw, "completion");
        if self.settings.debug {
            self.events.utterance(raw.as_str(), false);
        }
        Ok(raw)
    }

    /// Split a trimmed completion into the turn to record and what to do
    /// with it. The end token is honoured only in the plain text before any
    /// call, and it wins over that call.
    fn interpret(&self, text: &str) -> Reply {
        let split = split_call(text, &self.settings.delimiters);

        if let Some(token) = &self.settings.end_token {
            if let Some(pos) = split.prefix.find(token.as_str()) {
                return Reply::Final {
                    text: split.prefix[..pos].trim().to_string(),
                    ended: true,
                };
            }
        }

        let Some(payload) = split.payload else {
            return Reply::Final { text: text.to_string(), ended: false };
        };

        let close = &self.settings.delimiters.close;
        let preamble = split.prefix.trim().to_string();
        match decode_payload(payload) {
            Ok(decoded) => {
                let kept = truncate_to_consumed(text, payload, decoded.consumed);
                debug!(payload = %&payload[..decoded.consumed], "call decoded");
                Reply::Call {
                    recorded: format!("{kept}{close}"),
                    preamble,
                    prepared: self.dispatcher.prepare(&decoded.value),
                }
            }
            Err(e) => Reply::Call {
                recorded: format!("{text}{close}"),
                preamble,
                prepared: Err(e.into()),
            },
        }
    }
}

/// Opens independent sessions over shared, read-only collaborators.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    provider: LlmProvider,
    dispatcher: CallDispatcher,
    settings: DialogueSettings,
}

impl SessionFactory {
    pub fn new(
        provider: LlmProvider,
        dispatcher: CallDispatcher,
        settings: DialogueSettings,
    ) -> Result<Self, SettingsError> {
        let settings = settings.validate()?;
        Ok(Self { provider, dispatcher, settings })
    }

    pub fn open(&self, events: EventSink) -> DialogueEngine {
        DialogueEngine::new(
            self.provider.clone(),
            self.dispatcher.clone(),
            self.settings.clone(),
            events,
        )
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::events::SessionEvent;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::plugins::{PluginDescriptor, PluginRegistry, PluginTransport, Router, ScriptedTransport};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const CALL: &str = r#"<call>{"plugin_system_name":"todo","request_object_params":{"method":"GET","url":"http://localhost:5003/todos/bob"}}"#;

    fn dispatcher(transport: ScriptedTransport) -> CallDispatcher {
        let registry: PluginRegistry = [PluginDescriptor::new("todo", "Manage a TODO list.")].into_iter().collect();
        CallDispatcher::Plugins(Router::new(Arc::new(registry), PluginTransport::Scripted(transport)))
    }

    fn engine(
        provider: &ScriptedProvider,
        transport: ScriptedTransport,
        settings: DialogueSettings,
    ) -> (DialogueEngine, UnboundedReceiver<SessionEvent>) {
        let (events, rx) = EventSink::channel();
        let engine = DialogueEngine::new(
            LlmProvider::Scripted(provider.clone()),
            dispatcher(transport),
            settings,
            events,
        );
        (engine, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn utterances(events: &[SessionEvent]) -> Vec<(String, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Utterance { text, is_system } => Some((text.clone(), *is_system)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn preamble_mentions_plugins_only_when_registered() {
        let provider = ScriptedProvider::default();
        let (with, _) = engine(&provider, ScriptedTransport::default(), DialogueSettings::default());
        assert!(with.transcript().preamble().contains("plugin_system_name: todo"));

        let (events, _rx) = EventSink::channel();
        let empty = CallDispatcher::Plugins(Router::new(
            Arc::new(PluginRegistry::new()),
            PluginTransport::Scripted(ScriptedTransport::default()),
        ));
        let settings = DialogueSettings {
            extra_instructions: Some("Be brief.".into()),
            ..DialogueSettings::default()
        };
        let without = DialogueEngine::new(LlmProvider::Scripted(provider), empty, settings, events);
        assert_eq!(without.transcript().preamble(), "Be brief.\n");
    }

    #[tokio::test]
    async fn request_carries_prompt_stops_and_budget() {
        let provider = ScriptedProvider::new(["Hello!"]);
        let (mut e, _rx) = engine(&provider, ScriptedTransport::default(), DialogueSettings::default());
        e.submit(["  hi  "]).await.unwrap();

        let req = &provider.requests()[0];
        assert!(req.prompt.ends_with("\nUser: hi\nAI:"));
        assert_eq!(req.stop, vec!["AI:", "User:", "System:", "</call>"]);
        assert_eq!(req.max_tokens, 750);
        assert_eq!(req.temperature, 0.9);
    }

    #[tokio::test]
    async fn malformed_call_is_fed_back() {
        let provider = ScriptedProvider::new([r#"Checking. <call>{"plugin_system_name": "todo""#, "Sorry, try again later."]);
        let (mut e, mut rx) = engine(&provider, ScriptedTransport::default(), DialogueSettings::default());
        assert_eq!(e.submit(["list my todos"]).await.unwrap(), SessionState::Listening);

        let turns = e.transcript().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].text, r#"Checking. <call>{"plugin_system_name": "todo"</call>"#);
        assert_eq!(turns[2].speaker, Speaker::System);
        assert!(turns[2].text.starts_with("Malformed JSON"));
        assert_eq!(
            utterances(&drain(&mut rx)),
            vec![("Sorry, try again later.".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn retries_use_retry_temperature_and_record_last_attempt() {
        let provider = ScriptedProvider::new([
            r#"<call>{"plugin_system_name":"ghost","request_object_params":{}}"#,
            CALL,
            "You have no todos.",
        ]);
        let transport = ScriptedTransport::new([(200, "[]")]);
        let settings = DialogueSettings {
            max_validation_retries: 2,
            retry_temperature: 0.1,
            ..DialogueSettings::default()
        };
        let (mut e, _rx) = engine(&provider, transport.clone(), settings);
        e.submit(["list"]).await.unwrap();

        let temps: Vec<f32> = provider.requests().iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![0.9, 0.1, 0.9]);

        let turns = e.transcript().turns();
        assert_eq!(turns.len(), 4);
        assert!(!turns.iter().any(|t| t.text.contains("ghost")));
        assert_eq!(turns[2].text, "API responded with HTTP status code 200, response body: []");
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_record_the_error() {
        let ghost = r#"<call>{"plugin_system_name":"ghost","request_object_params":{}}"#;
        let provider = ScriptedProvider::new([ghost, ghost, "I can't do that."]);
        let settings = DialogueSettings { max_validation_retries: 1, ..DialogueSettings::default() };
        let (mut e, _rx) = engine(&provider, ScriptedTransport::default(), settings);
        e.submit(["do it"]).await.unwrap();

        let turns = e.transcript().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].text, "unknown plugin: ghost");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn round_limit_returns_to_listening() {
        let provider = ScriptedProvider::new([CALL, CALL, CALL]);
        let transport = ScriptedTransport::new([(200, "a"), (200, "b")]);
        let settings = DialogueSettings { max_rounds: 2, ..DialogueSettings::default() };
        let (mut e, mut rx) = engine(&provider, transport, settings);

        let err = e.submit(["loop"]).await.unwrap_err();
        assert!(matches!(err, DialogueError::RoundLimitExceeded(2)));
        assert_eq!(e.state(), SessionState::Listening);
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&SessionEvent::StateChanged(SessionState::Listening))
        );
    }

    #[tokio::test]
    async fn backend_error_leaves_replying() {
        let provider = ScriptedProvider::default();
        provider.push_error("rate limited");
        let (mut e, _rx) = engine(&provider, ScriptedTransport::default(), DialogueSettings::default());

        let err = e.submit(["hi"]).await.unwrap_err();
        assert!(matches!(err, DialogueError::Backend(_)));
        assert_eq!(e.state(), SessionState::Replying);
        assert_eq!(e.transcript().turns().len(), 1);
        assert!(matches!(
            e.submit(["again"]).await,
            Err(DialogueError::InvalidSessionState(SessionState::Replying))
        ));
    }

    #[tokio::test]
    async fn end_token_wins_over_call() {
        let provider = ScriptedProvider::new([format!("Bye now END {CALL}")]);
        let transport = ScriptedTransport::default();
        let settings = DialogueSettings { end_token: Some("END".into()), ..DialogueSettings::default() };
        let (mut e, _rx) = engine(&provider, transport.clone(), settings);

        assert_eq!(e.submit(["bye"]).await.unwrap(), SessionState::Ended);
        assert_eq!(e.transcript().turns()[1].text, "Bye now");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn end_token_inside_payload_is_ignored() {
        let call = r#"<call>{"plugin_system_name":"todo","request_object_params":{"method":"GET","url":"http://localhost:5003/END"}}"#;
        let provider = ScriptedProvider::new([call, "Done."]);
        let transport = ScriptedTransport::new([(200, "ok")]);
        let settings = DialogueSettings { end_token: Some("END".into()), ..DialogueSettings::default() };
        let (mut e, _rx) = engine(&provider, transport.clone(), settings);

        assert_eq!(e.submit(["go"]).await.unwrap(), SessionState::Listening);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn call_preamble_surfaced_when_enabled() {
        let provider = ScriptedProvider::new([format!("One moment. {CALL}"), "Here you go.".to_string()]);
        let transport = ScriptedTransport::new([(200, "[]")]);
        let settings = DialogueSettings { surface_call_preamble: true, ..DialogueSettings::default() };
        let (mut e, mut rx) = engine(&provider, transport, settings);
        e.submit(["todos?"]).await.unwrap();

        assert_eq!(
            utterances(&drain(&mut rx)),
            vec![("One moment.".to_string(), false), ("Here you go.".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn debug_mode_emits_raw_output_and_results() {
        let provider = ScriptedProvider::new([CALL, "Nothing to do."]);
        let transport = ScriptedTransport::new([(404, "not found")]);
        let settings = DialogueSettings { debug: true, ..DialogueSettings::default() };
        let (mut e, mut rx) = engine(&provider, transport, settings);
        e.submit(["todos?"]).await.unwrap();

        assert_eq!(
            utterances(&drain(&mut rx)),
            vec![
                (CALL.to_string(), false),
                ("API responded with HTTP status code 404".to_string(), true),
                ("Nothing to do.".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn empty_completion_is_recorded_silently() {
        let provider = ScriptedProvider::new(["   "]);
        let (mut e, mut rx) = engine(&provider, ScriptedTransport::default(), DialogueSettings::default());
        e.submit(["..."]).await.unwrap();
        assert_eq!(e.transcript().turns()[1].text, "");
        assert!(utterances(&drain(&mut rx)).is_empty());
    }

    #[tokio::test]
    async fn sessions_from_one_factory_are_independent() {
        let provider = ScriptedProvider::new(["one", "two"]);
        let factory = SessionFactory::new(
            LlmProvider::Scripted(provider),
            dispatcher(ScriptedTransport::default()),
            DialogueSettings::default(),
        )
        .unwrap();
        let mut a = factory.open(EventSink::discard());
        let mut b = factory.open(EventSink::discard());
        a.submit(["a"]).await.unwrap();
        b.submit(["b"]).await.unwrap();
        assert_eq!(a.transcript().turns()[1].text, "one");
        assert_eq!(b.transcript().turns()[1].text, "two");
        assert_eq!(b.transcript().turns().len(), 2);
    }
}
