//! Dialogue orchestration.
//!
//! - **transcript**: append-only turn buffer rendered as the prompt.
//! - **extract**: splitting model output into text and an embedded call.
//! - **prompt**: preamble and call-protocol blocks.
//! - **events**: session state and outbound events.
//! - **dispatch**: the seam to plugins or local commands.
//! - **settings**: per-session knobs.
//! - **engine**: the state machine and session factory.

pub mod dispatch;
pub mod engine;
pub mod events;
pub mod extract;
pub mod prompt;
pub mod settings;
pub mod transcript;

pub use dispatch::{CallDispatcher, DispatchError, PreparedCall};
pub use engine::{DialogueEngine, DialogueError, SessionFactory};
pub use events::{EventSink, SessionEvent, SessionState};
pub use extract::CallPayloadError;
pub use settings::{DialogueSettings, SettingsError};
pub use transcript::{Delimiters, Names, Speaker, Transcript, Turn};
