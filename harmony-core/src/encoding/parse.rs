//! Batch parsing of completion tokens into messages.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::grammar::{ParsedHeader, RoleTracker};
use super::HarmonyEncoding;
use crate::chat::{Message, Role};
use crate::error::{HarmonyResult, HeaderErrorKind};
use crate::tokenizer::{decode_lossy_per_byte, Rank};

/// Parser behaviour shared by the batch and streaming parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseOptions {
    /// Reject malformed headers instead of recovering from them.
    pub strict: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl ParseOptions {
    pub fn lenient() -> Self {
        Self { strict: false }
    }
}

/// Assistant output split by channel.
///
/// `analysis` text is the reasoning and `final` text is the answer. Messages
/// on other channels are not part of either.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAssistant {
    pub reasoning: Option<String>,
    pub final_text: Option<String>,
}

impl ParsedAssistant {
    /// Concatenates the text of every `analysis` and `final` message in order.
    pub fn from_messages<'a, I>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut reasoning = String::new();
        let mut final_text = String::new();
        for message in messages {
            match message.channel.as_deref() {
                Some("analysis") => reasoning.push_str(&message.text()),
                Some("final") => final_text.push_str(&message.text()),
                _ => {}
            }
        }
        Self {
            reasoning: Some(reasoning).filter(|t| !t.is_empty()),
            final_text: Some(final_text).filter(|t| !t.is_empty()),
        }
    }
}

enum Segment {
    Start,
    Header { tokens: Vec<Rank>, opened: bool },
    Body { header: ParsedHeader, bytes: Vec<u8> },
}

impl HarmonyEncoding {
    /// Parses sampled tokens into messages, rejecting malformed headers.
    ///
    /// When `role` is given the tokens are assumed to continue a prompt that
    /// ended in `<|start|>{role}`, so the first header carries no role.
    pub fn parse_messages_from_completion_tokens<I>(
        &self,
        tokens: I,
        role: Option<Role>,
    ) -> HarmonyResult<Vec<Message>>
    where
        I: IntoIterator<Item = Rank>,
    {
        self.parse_messages_from_completion_tokens_with_options(tokens, role, ParseOptions::default())
    }

    /// Parses an assistant completion and splits it into reasoning and answer.
    ///
    /// The tokens continue a prompt rendered for an assistant completion.
    pub fn parse_completion_tokens<I>(&self, tokens: I) -> HarmonyResult<ParsedAssistant>
    where
        I: IntoIterator<Item = Rank>,
    {
        let messages = self.parse_messages_from_completion_tokens(tokens, Some(Role::Assistant))?;
        Ok(ParsedAssistant::from_messages(&messages))
    }

    pub fn parse_messages_from_completion_tokens_with_options<I>(
        &self,
        tokens: I,
        role: Option<Role>,
        options: ParseOptions,
    ) -> HarmonyResult<Vec<Message>>
    where
        I: IntoIterator<Item = Rank>,
    {
        let ids = *self.formatting();
        let mut roles = RoleTracker::new(role);
        let mut messages = Vec::new();
        let mut segment = match role {
            Some(_) => Segment::Header {
                tokens: Vec::new(),
                opened: false,
            },
            None => Segment::Start,
        };

        for token in tokens {
            segment = match segment {
                Segment::Start if token == ids.start => Segment::Header {
                    tokens: Vec::new(),
                    opened: true,
                },
                Segment::Start if options.strict => {
                    return Err(HeaderErrorKind::UnexpectedToken {
                        token,
                        expected: "<|start|>",
                    }
                    .into());
                }
                Segment::Start if ids.is_terminator(token) => {
                    warn!(token, "skipping terminator outside of a message");
                    Segment::Start
                }
                Segment::Start => {
                    let role = roles.inherited();
                    warn!(token, role = %role, "message without header, inheriting role");
                    Segment::Body {
                        header: ParsedHeader::bare(role),
                        bytes: self.tokenizer().token_bytes(token)?.to_vec(),
                    }
                }
                Segment::Header { tokens, opened } if token == ids.message => {
                    let header = self.parse_header_tokens(&tokens, &roles, opened, options.strict)?;
                    roles.record(header.author.role);
                    Segment::Body {
                        header,
                        bytes: Vec::new(),
                    }
                }
                Segment::Header {
                    tokens,
                    opened: false,
                } if !options.strict && ids.is_terminator(token) => {
                    if let Some(message) = self.headerless_message(&tokens, &roles)? {
                        roles.record(message.author.role);
                        messages.push(message);
                    }
                    Segment::Start
                }
                Segment::Header { tokens, .. } if token == ids.start && tokens.is_empty() => {
                    Segment::Header {
                        tokens,
                        opened: true,
                    }
                }
                Segment::Header { mut tokens, opened } => {
                    tokens.push(token);
                    Segment::Header { tokens, opened }
                }
                Segment::Body { header, bytes } if ids.is_terminator(token) => {
                    let message = finish_message(header, &bytes);
                    roles.record(message.author.role);
                    messages.push(message);
                    Segment::Start
                }
                Segment::Body { header, mut bytes } => {
                    bytes.extend_from_slice(self.tokenizer().token_bytes(token)?);
                    Segment::Body { header, bytes }
                }
            };
        }

        match segment {
            Segment::Body { header, bytes } => messages.push(finish_message(header, &bytes)),
            Segment::Header {
                tokens,
                opened: false,
            } if !options.strict => messages.extend(self.headerless_message(&tokens, &roles)?),
            Segment::Header { tokens, opened } if opened || !tokens.is_empty() => {
                if options.strict {
                    return Err(HeaderErrorKind::IncompleteHeader.into());
                }
                warn!(tokens = tokens.len(), "dropping unterminated message header");
            }
            _ => {}
        }
        Ok(messages)
    }
}

impl HarmonyEncoding {
    /// The message for a seeded header that ended without `<|message|>`.
    ///
    /// The collected tokens were body text under the seeded role. Returns
    /// `None` when nothing was collected.
    pub(crate) fn headerless_message(
        &self,
        tokens: &[Rank],
        roles: &RoleTracker,
    ) -> HarmonyResult<Option<Message>> {
        if tokens.is_empty() {
            return Ok(None);
        }
        let role = roles.inherited();
        warn!(role = %role, tokens = tokens.len(), "completion has no message header, using the seeded role");
        let bytes = self.tokenizer().decode_bytes(tokens)?;
        Ok(Some(finish_message(ParsedHeader::bare(role), &bytes)))
    }
}

fn finish_message(header: ParsedHeader, bytes: &[u8]) -> Message {
    let message = header.into_message(decode_lossy_per_byte(bytes));
    debug!(
        role = %message.author.role,
        channel = message.channel.as_deref(),
        recipient = message.recipient.as_deref(),
        "parsed message"
    );
    message
}
