//! Error types for the arm client.

use thiserror::Error;

/// Errors surfaced by the reliable channel.
///
/// None of these are fatal: the channel keeps its pending commands and the
/// caller decides whether to log, retry or report upward.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Inbound frame was not a JSON object or carried a bad `f`/`e` field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The underlying connection dropped or failed to open.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound payload could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ChannelError {
    /// Create a Malformed error with a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a Transport error with a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Errors raised while loading a [`crate::config::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the client cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}
