//! Console channel: reads lines from stdin, submits each as one user turn
//! and prints the replies.
//!
//! Runs until the session ends, stdin closes or `shutdown` is cancelled.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::AppError;
use crate::dialogue::{DialogueError, EventSink, SessionEvent, SessionFactory, SessionState};
use crate::runtime::{Component, ComponentFuture};

pub struct PtyChannel {
    channel_id: String,
    factory: SessionFactory,
}

impl PtyChannel {
    pub fn new(channel_id: impl Into<String>, factory: SessionFactory) -> Self {
        Self { channel_id: channel_id.into(), factory }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(self.channel_id, self.factory, shutdown))
    }
}

fn render(event: &SessionEvent, assistant: &str, system: &str) -> Option<String> {
    match event {
        SessionEvent::Utterance { text, is_system: false } => Some(format!("{assistant}: {text}")),
        SessionEvent::Utterance { text, is_system: true } => Some(format!("[{system}] {text}")),
        SessionEvent::StateChanged(_) => None,
    }
}

/// Everything the session has emitted so far, rendered. Called after each
/// submit so the reply is on screen before the next prompt.
fn drain_lines(rx: &mut UnboundedReceiver<SessionEvent>, assistant: &str, system: &str) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.extend(render(&event, assistant, system));
    }
    out
}

async fn run_pty(
    channel_id: String,
    factory: SessionFactory,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "console channel started");
    println!("─────────────────────────────────");
    println!(" parley console  (Ctrl-C to quit)");
    println!("─────────────────────────────────");

    let names = factory.settings().names.clone();
    let (events, mut rx) = EventSink::channel();
    let mut session = factory.open(events);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let input = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("console channel shutting down");
                break;
            }

            line = lines.next_line() => match line {
                Err(e) => {
                    warn!("console read error: {e}");
                    break;
                }
                Ok(None) => {
                    info!("console stdin closed");
                    break;
                }
                Ok(Some(input)) => input.trim().to_string(),
            }
        };
        if input.is_empty() {
            continue;
        }
        debug!(input = %input, "console received line");

        let outcome = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown during reply, discarding session");
                break;
            }

            r = session.submit([input]) => r,
        };

        for line in drain_lines(&mut rx, &names.assistant, &names.system) {
            println!("{line}");
        }

        match outcome {
            Ok(SessionState::Ended) => {
                info!("conversation ended");
                break;
            }
            Ok(_) => {}
            Err(e @ DialogueError::RoundLimitExceeded(_)) => {
                eprintln!("[error] {e}");
            }
            Err(e) => {
                eprintln!("[error] {e}");
                warn!(error = %e, "session unusable, closing console");
                break;
            }
        }
    }

    drop(session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_assistant_and_system_lines() {
        let ai = SessionEvent::Utterance { text: "Hi!".into(), is_system: false };
        let sys = SessionEvent::Utterance { text: "API responded".into(), is_system: true };
        assert_eq!(render(&ai, "AI", "System").as_deref(), Some("AI: Hi!"));
        assert_eq!(render(&sys, "AI", "System").as_deref(), Some("[System] API responded"));
        assert!(render(&SessionEvent::StateChanged(SessionState::Replying), "AI", "System").is_none());
    }

    #[tokio::test]
    async fn reply_is_printed_before_next_prompt() {
        use std::sync::Arc;

        use crate::commands::CommandRegistry;
        use crate::dialogue::{CallDispatcher, DialogueSettings};
        use crate::llm::LlmProvider;
        use crate::llm::providers::scripted::ScriptedProvider;

        let factory = SessionFactory::new(
            LlmProvider::Scripted(ScriptedProvider::new(["Hello!", "Bye."])),
            CallDispatcher::Commands(Arc::new(CommandRegistry::new())),
            DialogueSettings::default(),
        )
        .unwrap();
        let (events, mut rx) = EventSink::channel();
        let mut session = factory.open(events);

        session.submit(["hi".to_string()]).await.unwrap();
        assert_eq!(drain_lines(&mut rx, "AI", "System"), vec!["AI: Hello!".to_string()]);

        session.submit(["again".to_string()]).await.unwrap();
        assert_eq!(drain_lines(&mut rx, "AI", "System"), vec!["AI: Bye.".to_string()]);
        assert!(drain_lines(&mut rx, "AI", "System").is_empty());
    }
}
