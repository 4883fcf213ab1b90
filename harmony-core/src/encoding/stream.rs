//! Incremental parsing of a token stream.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::grammar::{ParsedHeader, RoleTracker};
use super::parse::{ParseOptions, ParsedAssistant};
use super::HarmonyEncoding;
use crate::chat::{Channel, ContentType, Message, Recipient, Role};
use crate::error::{HarmonyError, HarmonyResult, HeaderErrorKind};
use crate::tokenizer::{Rank, Utf8Accumulator};

/// Where the parser is within the current message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    ExpectStart,
    Header {
        header_tokens: Vec<Rank>,
        /// Whether `<|start|>` was seen for this header.
        opened: bool,
    },
    Content {
        header: ParsedHeader,
    },
}

/// What a single token changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamDelta {
    pub role: Option<Role>,
    pub channel: Option<Channel>,
    pub recipient: Option<Recipient>,
    pub content_type: Option<ContentType>,
    /// Text produced by this token; empty for header and structural tokens.
    pub content_delta: String,
    /// Set on the token that terminated a message.
    pub message_completed: bool,
}

/// Parses completion tokens one at a time.
///
/// A parser follows one stream. Feed it with [`process`](Self::process) and
/// end it with [`finish`](Self::finish); the completed messages equal what
/// the batch parser returns for the same tokens.
#[derive(Debug, Clone)]
pub struct StreamableParser {
    encoding: HarmonyEncoding,
    options: ParseOptions,
    roles: RoleTracker,
    state: StreamState,
    tokens: Vec<Rank>,
    messages: Vec<Message>,
    utf8: Utf8Accumulator,
    content: String,
    last_content_delta: Option<String>,
    failure: Option<String>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    state: &'a StreamState,
    strict: bool,
    current_role: Option<Role>,
    current_content: &'a str,
    last_content_delta: Option<&'a str>,
    pending_bytes: &'a [u8],
    tokens: &'a [Rank],
    messages: &'a [Message],
    failure: Option<&'a str>,
}

impl StreamableParser {
    /// A strict parser. See
    /// [`HarmonyEncoding::parse_messages_from_completion_tokens`] for `role`.
    pub fn new(encoding: HarmonyEncoding, role: Option<Role>) -> Self {
        Self::new_with_options(encoding, role, ParseOptions::default())
    }

    pub fn new_with_options(encoding: HarmonyEncoding, role: Option<Role>, options: ParseOptions) -> Self {
        let state = match role {
            Some(_) => StreamState::Header {
                header_tokens: Vec::new(),
                opened: false,
            },
            None => StreamState::ExpectStart,
        };
        Self {
            encoding,
            options,
            roles: RoleTracker::new(role),
            state,
            tokens: Vec::new(),
            messages: Vec::new(),
            utf8: Utf8Accumulator::new(),
            content: String::new(),
            last_content_delta: None,
            failure: None,
        }
    }

    /// Consumes one token.
    ///
    /// A grammar error leaves the parser failed; every later call returns
    /// [`HarmonyError::ParserFailed`]. Unknown token ids are rejected without
    /// changing any state.
    pub fn process(&mut self, token: Rank) -> HarmonyResult<StreamDelta> {
        self.ensure_usable()?;
        let result = self.step(token);
        self.record_failure(result)
    }

    /// Signals the end of the stream, completing an open message.
    pub fn process_eos(&mut self) -> HarmonyResult<StreamDelta> {
        self.ensure_usable()?;
        let result = self.end_of_stream();
        self.record_failure(result)
    }

    /// Ends the stream and returns every completed message.
    pub fn finish(mut self) -> HarmonyResult<Vec<Message>> {
        self.process_eos()?;
        Ok(self.messages)
    }

    /// Ends the stream and splits the messages into reasoning and answer.
    pub fn finish_assistant(self) -> HarmonyResult<ParsedAssistant> {
        let messages = self.finish()?;
        Ok(ParsedAssistant::from_messages(&messages))
    }

    /// Returns the completed messages without ending the stream.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn ensure_usable(&self) -> HarmonyResult<()> {
        match &self.failure {
            Some(reason) => Err(HarmonyError::ParserFailed(reason.clone())),
            None => Ok(()),
        }
    }

    fn record_failure(&mut self, result: HarmonyResult<StreamDelta>) -> HarmonyResult<StreamDelta> {
        if let Err(HarmonyError::HeaderGrammar(kind)) = &result {
            self.failure = Some(kind.to_string());
        }
        result
    }

    fn step(&mut self, token: Rank) -> HarmonyResult<StreamDelta> {
        let bytes = self.encoding.tokenizer().token_bytes(token)?.to_vec();
        let ids = *self.encoding.formatting();
        self.tokens.push(token);
        self.last_content_delta = None;

        let mut delta = String::new();
        let mut completed = None;
        let state = std::mem::replace(&mut self.state, StreamState::ExpectStart);
        self.state = match state {
            StreamState::ExpectStart if token == ids.start => StreamState::Header {
                header_tokens: Vec::new(),
                opened: true,
            },
            StreamState::ExpectStart if self.options.strict => {
                return Err(HeaderErrorKind::UnexpectedToken {
                    token,
                    expected: "<|start|>",
                }
                .into());
            }
            StreamState::ExpectStart if ids.is_terminator(token) => {
                warn!(token, "skipping terminator outside of a message");
                StreamState::ExpectStart
            }
            StreamState::ExpectStart => {
                let role = self.roles.inherited();
                warn!(token, role = %role, "message without header, inheriting role");
                delta = self.utf8.push(&bytes);
                StreamState::Content {
                    header: ParsedHeader::bare(role),
                }
            }
            StreamState::Header {
                header_tokens,
                opened,
            } if token == ids.message => {
                let mut header = self.encoding.parse_header_tokens(
                    &header_tokens,
                    &self.roles,
                    opened,
                    self.options.strict,
                )?;
                self.roles.record(header.author.role);
                if let Some(lead) = header.take_body_lead() {
                    delta = lead;
                }
                trace!(role = %header.author.role, "message header closed");
                StreamState::Content { header }
            }
            StreamState::Header {
                header_tokens,
                opened: false,
            } if !self.options.strict && ids.is_terminator(token) => {
                if let Some(message) = self.encoding.headerless_message(&header_tokens, &self.roles)? {
                    delta = message.text();
                    completed = Some(ParsedHeader::bare(message.author.role));
                }
                StreamState::ExpectStart
            }
            StreamState::Header { header_tokens, .. }
                if token == ids.start && header_tokens.is_empty() =>
            {
                StreamState::Header {
                    header_tokens,
                    opened: true,
                }
            }
            StreamState::Header {
                mut header_tokens,
                opened,
            } => {
                header_tokens.push(token);
                StreamState::Header {
                    header_tokens,
                    opened,
                }
            }
            StreamState::Content { header } if ids.is_terminator(token) => {
                delta = self.utf8.flush();
                completed = Some(header);
                StreamState::ExpectStart
            }
            StreamState::Content { header } => {
                delta = self.utf8.push(&bytes);
                StreamState::Content { header }
            }
        };
        trace!(token, state = ?self.state, "processed token");

        Ok(self.emit(delta, completed))
    }

    fn end_of_stream(&mut self) -> HarmonyResult<StreamDelta> {
        self.last_content_delta = None;
        let state = std::mem::replace(&mut self.state, StreamState::ExpectStart);
        match state {
            StreamState::Content { header } => {
                let delta = self.utf8.flush();
                Ok(self.emit(delta, Some(header)))
            }
            StreamState::Header {
                header_tokens,
                opened: false,
            } if !self.options.strict => {
                match self.encoding.headerless_message(&header_tokens, &self.roles)? {
                    Some(message) => {
                        let header = ParsedHeader::bare(message.author.role);
                        Ok(self.emit(message.text(), Some(header)))
                    }
                    None => Ok(StreamDelta::default()),
                }
            }
            StreamState::Header {
                header_tokens,
                opened,
            } if opened || !header_tokens.is_empty() => {
                if self.options.strict {
                    return Err(HeaderErrorKind::IncompleteHeader.into());
                }
                warn!(tokens = header_tokens.len(), "dropping unterminated message header");
                Ok(StreamDelta::default())
            }
            other => {
                self.state = other;
                Ok(StreamDelta::default())
            }
        }
    }

    /// Appends `delta` to the current content and completes the message
    /// described by `completed`, if any.
    fn emit(&mut self, delta: String, completed: Option<ParsedHeader>) -> StreamDelta {
        self.content.push_str(&delta);
        if !delta.is_empty() {
            self.last_content_delta = Some(delta.clone());
        }

        let Some(header) = completed else {
            return StreamDelta {
                role: self.current_role(),
                channel: self.current_channel().cloned(),
                recipient: self.current_recipient().cloned(),
                content_type: self.current_content_type().cloned(),
                content_delta: delta,
                message_completed: false,
            };
        };

        let stream_delta = StreamDelta {
            role: Some(header.author.role),
            channel: header.channel.clone(),
            recipient: header.recipient.clone(),
            content_type: header.content_type.clone(),
            content_delta: delta,
            message_completed: true,
        };
        let message = header.into_message(std::mem::take(&mut self.content));
        debug!(
            role = %message.author.role,
            channel = message.channel.as_deref(),
            recipient = message.recipient.as_deref(),
            "completed streamed message"
        );
        self.roles.record(message.author.role);
        self.messages.push(message);
        stream_delta
    }

    fn current_header(&self) -> Option<&ParsedHeader> {
        match &self.state {
            StreamState::Content { header } => Some(header),
            _ => None,
        }
    }

    /// Text of the message being parsed.
    pub fn current_content(&self) -> &str {
        &self.content
    }

    pub fn current_role(&self) -> Option<Role> {
        match &self.state {
            StreamState::Content { header } => Some(header.author.role),
            StreamState::Header { .. } => self.roles.seeded(),
            StreamState::ExpectStart => None,
        }
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.current_header().and_then(|h| h.channel.as_ref())
    }

    pub fn current_recipient(&self) -> Option<&Recipient> {
        self.current_header().and_then(|h| h.recipient.as_ref())
    }

    pub fn current_content_type(&self) -> Option<&ContentType> {
        self.current_header().and_then(|h| h.content_type.as_ref())
    }

    /// Text produced by the most recent token, if it produced any.
    pub fn last_content_delta(&self) -> Option<&str> {
        self.last_content_delta.as_deref()
    }

    /// Messages completed so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Every token accepted so far.
    pub fn tokens(&self) -> &[Rank] {
        &self.tokens
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// JSON snapshot of the parser for diagnostics.
    pub fn state_json(&self) -> HarmonyResult<String> {
        let snapshot = Snapshot {
            state: &self.state,
            strict: self.options.strict,
            current_role: self.current_role(),
            current_content: &self.content,
            last_content_delta: self.last_content_delta(),
            pending_bytes: self.utf8.pending_bytes(),
            tokens: &self.tokens,
            messages: &self.messages,
            failure: self.failure.as_deref(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }
}
