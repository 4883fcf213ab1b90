//! Error types shared across the crate.

use thiserror::Error;

use crate::config::{ConfigError, ValidationError};
use crate::tokenizer::{DecodeError, Rank, VocabError};

/// Result alias used by every fallible Harmony operation.
pub type HarmonyResult<T> = Result<T, HarmonyError>;

#[derive(Debug, Error)]
pub enum HarmonyError {
    /// Text passed to an encoder contained a special token the policy forbids.
    #[error("encountered text that corresponds to disallowed special token {token:?} at byte offset {offset}")]
    DisallowedSpecialToken { token: String, offset: usize },

    #[error("failed to decode tokens: {0}")]
    Decoding(#[from] DecodeError),

    #[error("malformed message header: {0}")]
    HeaderGrammar(#[from] HeaderErrorKind),

    /// The conversation or one of its messages cannot be rendered.
    #[error("invalid conversation: {0}")]
    Configuration(#[from] ValidationError),

    #[error("vocabulary error: {0}")]
    Vocabulary(#[from] VocabError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A streaming parser was used after it reported a grammar error.
    #[error("parser is unusable after an earlier error: {0}")]
    ParserFailed(String),
}

/// Ways a token stream can violate the message grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderErrorKind {
    #[error("message header does not name a role")]
    MissingRole,

    #[error("channel marker is not followed by a channel name")]
    EmptyChannel,

    #[error("unexpected tokens remaining in message header: {0:?}")]
    UnexpectedTokens(Vec<String>),

    #[error("unexpected token {token} while expecting {expected}")]
    UnexpectedToken { token: Rank, expected: &'static str },

    #[error("token stream ended inside a message header")]
    IncompleteHeader,
}
