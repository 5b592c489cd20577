//! Append-only conversation transcript.
//!
//! The rendered transcript is the exact prompt sent to the completion
//! backend: the preamble followed by one `"\n{label}: {text}"` line per turn.

use serde::Serialize;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Assistant,
    User,
    /// Call results and dispatch errors.
    System,
}

/// Speaker labels as they appear in the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    pub assistant: String,
    pub user: String,
    pub system: String,
}

impl Names {
    pub fn label(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::Assistant => &self.assistant,
            Speaker::User => &self.user,
            Speaker::System => &self.system,
        }
    }
}

impl Default for Names {
    fn default() -> Self {
        Self {
            assistant: "AI".into(),
            user: "User".into(),
            system: "System".into(),
        }
    }
}

/// The literal markers wrapping an embedded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "<call>".into(),
            close: "</call>".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    preamble: String,
    names: Names,
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new(preamble: impl Into<String>, names: Names) -> Self {
        Self {
            preamble: preamble.into(),
            names,
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        let turn = Turn { speaker, text: text.into() };
        tracing::debug!(speaker = ?turn.speaker, text = %turn.text, "transcript append");
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn names(&self) -> &Names {
        &self.names
    }

    /// Everything said so far.
    pub fn render(&self) -> String {
        let mut out = self.preamble.clone();
        for turn in &self.turns {
            out.push('\n');
            out.push_str(self.names.label(turn.speaker));
            out.push_str(": ");
            out.push_str(&turn.text);
        }
        out
    }

    /// The rendered transcript followed by an open assistant label, ready
    /// for the model to continue.
    pub fn completion_prompt(&self) -> String {
        format!("{}\n{}:", self.render(), self.names.assistant)
    }

    /// The three speaker labels (with colon) plus the closing delimiter.
    pub fn stop_sequences(&self, delimiters: &Delimiters) -> Vec<String> {
        vec![
            format!("{}:", self.names.assistant),
            format!("{}:", self.names.user),
            format!("{}:", self.names.system),
            delimiters.close.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_turns_after_preamble() {
        let mut t = Transcript::new("Be nice.\n", Names::default());
        t.push(Speaker::User, "hi");
        t.push(Speaker::Assistant, "hello");
        assert_eq!(t.render(), "Be nice.\n\nUser: hi\nAI: hello");
        assert_eq!(t.completion_prompt(), "Be nice.\n\nUser: hi\nAI: hello\nAI:");
    }

    #[test]
    fn empty_transcript_is_preamble() {
        let t = Transcript::new("P", Names::default());
        assert_eq!(t.render(), "P");
        assert!(t.turns().is_empty());
    }

    #[test]
    fn custom_labels() {
        let names = Names {
            assistant: "Grace".into(),
            user: "Customer".into(),
            system: "Backend".into(),
        };
        let mut t = Transcript::new("", names);
        t.push(Speaker::System, "ok");
        assert_eq!(t.render(), "\nBackend: ok");
        let stops = t.stop_sequences(&Delimiters::default());
        assert_eq!(stops, vec!["Grace:", "Customer:", "Backend:", "</call>"]);
    }
}
