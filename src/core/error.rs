//! Application-wide error types.
//!
//! Domain modules (dialogue, plugins, llm, commands) own their own error
//! enums; `AppError` covers startup and front-end failures that end the
//! process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
