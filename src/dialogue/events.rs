//! Session state and the event stream a session reports to its owner.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Listening,
    Replying,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Listening => "listening",
            SessionState::Replying => "replying",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Something to show. `is_system` marks call results and raw debug output.
    Utterance { text: String, is_system: bool },
    StateChanged(SessionState),
}

/// Sending half of a session's event stream.
///
/// Events are delivered in transcript order. A dropped receiver is not an
/// error: the session keeps running and its events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn utterance(&self, text: impl Into<String>, is_system: bool) {
        self.send(SessionEvent::Utterance { text: text.into(), is_system });
    }

    pub fn state(&self, state: SessionState) {
        self.send(SessionEvent::StateChanged(state));
    }

    fn send(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("session event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.state(SessionState::Replying);
        sink.utterance("hi", false);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::StateChanged(SessionState::Replying));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Utterance { text: "hi".into(), is_system: false }
        );
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.utterance("nobody listening", true);
        EventSink::discard().state(SessionState::Ended);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionState::Replying).unwrap(), "\"replying\"");
        assert_eq!(SessionState::Ended.to_string(), "ended");
    }
}
