//! Conversation model rendered to and parsed from Harmony tokens.
//!
//! A [`Conversation`] is an ordered list of [`Message`]s. Each message has an
//! [`Author`], optional routing metadata (recipient, channel, content type)
//! and a list of [`Content`] blocks. System and developer messages carry
//! structured content that the renderer expands into instruction text.

mod names;
mod types;

pub use names::{Channel, ContentType, Recipient};
pub use types::{
    Author, ChannelConfig, Content, Conversation, DeveloperContent, Message, ReasoningEffort,
    Role, SystemContent, TextContent, ToolDescription, ToolNamespaceConfig,
};
