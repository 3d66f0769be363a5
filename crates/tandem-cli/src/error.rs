use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tandem_core::Error),
    #[error(transparent)]
    Broadcast(#[from] tandem_core::broadcast::BroadcastError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No message content provided")]
    EmptyContent,
    #[error("Conversation title cannot be empty")]
    EmptyTitle,
    #[error("ID cannot be empty")]
    EmptyIdentifier,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Redis REST token missing for {0}. Run `tandem config init --redis-token ...` or set TANDEM_REDIS_REST_TOKEN."
    )]
    MissingToken(String),
}
