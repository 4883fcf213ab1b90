//! Formatting tokens and the message header grammar.
//!
//! A header is everything between `<|start|>` and `<|message|>`:
//!
//! ```text
//! {role}[:{name}] [to={recipient}]<|channel|>{channel} [<|constrain|>]{content_type}
//! ```
//!
//! Tool messages put the tool name where the role would be. The header
//! parser is shared by the batch and streaming parsers so both agree on
//! every edge case.

use serde::Serialize;
use tracing::warn;

use crate::chat::{Author, Channel, ContentType, Message, Recipient, Role};
use crate::error::{HarmonyResult, HeaderErrorKind};
use crate::tokenizer::{decode_lossy_per_byte, CoreBpe, Rank, VocabError};

use super::HarmonyEncoding;

/// Special tokens that structure a rendered conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormattingToken {
    Start,
    Message,
    EndMessage,
    EndMessageDoneSampling,
    EndMessageAssistantToTool,
    ConstrainedFormat,
    Channel,
}

impl FormattingToken {
    pub const ALL: [FormattingToken; 7] = [
        FormattingToken::Start,
        FormattingToken::Message,
        FormattingToken::EndMessage,
        FormattingToken::EndMessageDoneSampling,
        FormattingToken::EndMessageAssistantToTool,
        FormattingToken::ConstrainedFormat,
        FormattingToken::Channel,
    ];

    pub const fn surface(self) -> &'static str {
        match self {
            FormattingToken::Start => "<|start|>",
            FormattingToken::Message => "<|message|>",
            FormattingToken::EndMessage => "<|end|>",
            FormattingToken::EndMessageDoneSampling => "<|return|>",
            FormattingToken::EndMessageAssistantToTool => "<|call|>",
            FormattingToken::ConstrainedFormat => "<|constrain|>",
            FormattingToken::Channel => "<|channel|>",
        }
    }
}

/// Formatting token ids resolved against one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FormattingTokenIds {
    pub start: Rank,
    pub message: Rank,
    pub end: Rank,
    pub return_: Rank,
    pub call: Rank,
    pub constrain: Rank,
    pub channel: Rank,
}

impl FormattingTokenIds {
    pub(crate) fn resolve(tokenizer: &CoreBpe) -> Result<Self, VocabError> {
        let id = |token: FormattingToken| {
            tokenizer
                .special_token_id(token.surface())
                .ok_or_else(|| VocabError::MissingSpecialToken(token.surface().to_string()))
        };
        Ok(Self {
            start: id(FormattingToken::Start)?,
            message: id(FormattingToken::Message)?,
            end: id(FormattingToken::EndMessage)?,
            return_: id(FormattingToken::EndMessageDoneSampling)?,
            call: id(FormattingToken::EndMessageAssistantToTool)?,
            constrain: id(FormattingToken::ConstrainedFormat)?,
            channel: id(FormattingToken::Channel)?,
        })
    }

    pub(crate) fn get(&self, token: FormattingToken) -> Rank {
        match token {
            FormattingToken::Start => self.start,
            FormattingToken::Message => self.message,
            FormattingToken::EndMessage => self.end,
            FormattingToken::EndMessageDoneSampling => self.return_,
            FormattingToken::EndMessageAssistantToTool => self.call,
            FormattingToken::ConstrainedFormat => self.constrain,
            FormattingToken::Channel => self.channel,
        }
    }

    /// `<|end|>`, `<|return|>` or `<|call|>`.
    pub(crate) fn is_terminator(&self, token: Rank) -> bool {
        token == self.end || token == self.return_ || token == self.call
    }
}

/// Metadata parsed from a message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedHeader {
    pub author: Author,
    pub recipient: Option<Recipient>,
    pub channel: Option<Channel>,
    pub content_type: Option<ContentType>,
    /// Unrecognized header words kept in lenient mode; they lead the body,
    /// followed by a space.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_prefix: Option<String>,
}

impl ParsedHeader {
    /// Header of a message that arrived without one.
    pub(crate) fn bare(role: Role) -> Self {
        Self {
            author: Author::from(role),
            recipient: None,
            channel: None,
            content_type: None,
            body_prefix: None,
        }
    }

    /// The text that leads the body, separated from it by a space.
    pub(crate) fn take_body_lead(&mut self) -> Option<String> {
        self.body_prefix.take().map(|prefix| format!("{prefix} "))
    }

    pub(crate) fn into_message(mut self, text: String) -> Message {
        let text = match self.take_body_lead() {
            Some(mut lead) => {
                lead.push_str(&text);
                lead
            }
            None => text,
        };
        Message {
            author: self.author,
            content: vec![text.into()],
            recipient: self.recipient,
            channel: self.channel,
            content_type: self.content_type,
        }
    }
}

/// Role bookkeeping shared by both parsers.
///
/// The seeded role applies to the first header only. Lenient parsing falls
/// back to the most recent role, then to the assistant.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RoleTracker {
    seeded: Option<Role>,
    previous: Option<Role>,
}

impl RoleTracker {
    pub(crate) fn new(seeded: Option<Role>) -> Self {
        Self {
            seeded,
            previous: None,
        }
    }

    pub(crate) fn seeded(&self) -> Option<Role> {
        self.seeded
    }

    pub(crate) fn inherited(&self) -> Role {
        self.previous.or(self.seeded).unwrap_or(Role::Assistant)
    }

    pub(crate) fn record(&mut self, role: Role) {
        self.seeded = None;
        self.previous = Some(role);
    }
}

impl HarmonyEncoding {
    /// Decodes and parses the tokens between `<|start|>` and `<|message|>`.
    ///
    /// `opened` tells whether `<|start|>` was seen for this header.
    pub(crate) fn parse_header_tokens(
        &self,
        tokens: &[Rank],
        roles: &RoleTracker,
        opened: bool,
        strict: bool,
    ) -> HarmonyResult<ParsedHeader> {
        let bytes = self.tokenizer().decode_bytes(tokens)?;
        let text = decode_lossy_per_byte(&bytes);
        let fallback = (!strict).then(|| roles.inherited());
        Ok(parse_header(&text, roles.seeded(), fallback, opened, strict)?)
    }
}

/// Parses decoded header text.
///
/// A role written in the header always wins. `seeded_role` fills in for a
/// missing role; when `opened` is false the header continues a prompt that
/// already named the role, so no role slot is expected. `fallback_role` is
/// used when the header names no role; it is only given in lenient mode.
pub(crate) fn parse_header(
    text: &str,
    seeded_role: Option<Role>,
    fallback_role: Option<Role>,
    opened: bool,
    strict: bool,
) -> Result<ParsedHeader, HeaderErrorKind> {
    let channel_marker = FormattingToken::Channel.surface();
    let constrain_marker = FormattingToken::ConstrainedFormat.surface();

    let mut header = text.to_string();
    let mut channel = None;
    if let Some(idx) = header.find(channel_marker) {
        let after = &header[idx + channel_marker.len()..];
        let end = after
            .find(|c: char| c.is_whitespace() || c == '<')
            .unwrap_or(after.len());
        let value = &after[..end];
        if value.is_empty() {
            if strict {
                return Err(HeaderErrorKind::EmptyChannel);
            }
            warn!(header = text, "ignoring empty channel in message header");
        } else {
            channel = Some(Channel::new(value));
        }
        header = format!("{} {}", &header[..idx], &after[end..]);
    }

    let header = header.replace(constrain_marker, &format!(" {constrain_marker}"));
    let mut parts: Vec<&str> = header.split_whitespace().collect();

    let author = match parts.first().and_then(|part| split_role_slot(part)) {
        Some(author) => {
            parts.remove(0);
            author
        }
        None => match seeded_role {
            Some(seeded) if !opened => Author::from(seeded),
            _ => match parts.first() {
                Some(&first) if !first.starts_with("to=") && !first.starts_with(constrain_marker) => {
                    parts.remove(0);
                    Author::new(Role::Tool, first)
                }
                _ => match seeded_role.or(fallback_role) {
                    Some(role) => {
                        warn!(header = text, role = %role, "message header has no role, inheriting");
                        Author::from(role)
                    }
                    None => return Err(HeaderErrorKind::MissingRole),
                },
            },
        },
    };

    let mut recipient = None;
    let mut content_type = None;
    let mut leftover = Vec::new();
    let last = parts.len().saturating_sub(1);
    for (idx, part) in parts.iter().enumerate() {
        if let Some(target) = part.strip_prefix("to=") {
            if recipient.is_none() && !target.is_empty() {
                recipient = Some(Recipient::new(target));
                continue;
            }
        } else if (part.starts_with(constrain_marker) || idx == last) && content_type.is_none() {
            content_type = Some(ContentType::new(*part));
            continue;
        }
        leftover.push(part.to_string());
    }

    let body_prefix = if leftover.is_empty() {
        None
    } else if strict {
        return Err(HeaderErrorKind::UnexpectedTokens(leftover));
    } else {
        warn!(header = text, ?leftover, "moving unexpected header words into the body");
        Some(leftover.join(" "))
    };

    Ok(ParsedHeader {
        author,
        recipient,
        channel,
        content_type,
        body_prefix,
    })
}

/// Reads `role` or `role:name`. Returns `None` for anything that is not a role.
pub(crate) fn split_role_slot(part: &str) -> Option<Author> {
    let (role, name) = match part.split_once(':') {
        Some((role, name)) => (role, Some(name)),
        None => (part, None),
    };
    let role = Role::try_from(role).ok()?;
    Some(Author {
        role,
        name: name.filter(|n| !n.is_empty()).map(str::to_string),
    })
}
