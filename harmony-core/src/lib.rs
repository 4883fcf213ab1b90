//! Harmony Core Library
//!
//! Renders chat conversations into the Harmony token format used by the
//! gpt-oss models and parses sampled tokens back into messages, either in
//! one pass or token by token while streaming.
//!
//! ```no_run
//! use harmony_core::chat::{Conversation, Message, Role, SystemContent};
//! use harmony_core::{load_harmony_encoding, HarmonyEncodingName};
//!
//! # fn main() -> harmony_core::HarmonyResult<()> {
//! let encoding = load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss)?;
//! let conversation = Conversation::from_messages([
//!     Message::from_role_and_content(Role::System, SystemContent::new()),
//!     Message::from_role_and_content(Role::User, "What is 2 + 2?"),
//! ]);
//! let prompt = encoding.render_conversation_for_completion(&conversation, Role::Assistant, None)?;
//! # let completion = prompt;
//! let messages = encoding.parse_messages_from_completion_tokens(completion, Some(Role::Assistant))?;
//! # let _ = messages;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod encoding;
pub mod error;
pub mod registry;
pub mod tokenizer;

pub use encoding::{
    DecodeMode, FormattingToken, HarmonyEncoding, ParseOptions, ParsedAssistant, RenderConversationConfig,
    RenderOptions, RenderPurpose, SpecialTokenPolicy, StreamDelta, StreamableParser,
};
pub use error::{HarmonyError, HarmonyResult, HeaderErrorKind};
pub use registry::{
    load_harmony_encoding, load_harmony_encoding_from_bytes, load_harmony_encoding_from_file,
    HarmonyEncodingName,
};
pub use tokenizer::Rank;

/// Returns the version of the Harmony Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
