//! Rendering of messages and conversations to tokens.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::grammar::{split_role_slot, FormattingToken};
use super::typescript::render_namespace;
use super::HarmonyEncoding;
use crate::chat::{
    ChannelConfig, Content, ContentType, DeveloperContent, Message, Recipient, Role,
    SystemContent, ToolNamespaceConfig,
};
use crate::config::{ValidationError, ValidationErrorKind};
use crate::error::{HarmonyError, HarmonyResult};
use crate::tokenizer::Rank;

/// Conversation-level rendering switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConversationConfig {
    /// Omit assistant `analysis` messages whose turn already reached `final`.
    pub auto_drop_analysis: bool,
}

impl Default for RenderConversationConfig {
    fn default() -> Self {
        Self {
            auto_drop_analysis: true,
        }
    }
}

/// Per-message rendering switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Adds the commentary-channel hint for function calls to system text.
    pub conversation_has_function_tools: bool,
}

/// What a rendered conversation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPurpose {
    /// Every message with its own terminator.
    Raw,
    /// A final answer ends in `<|return|>` instead of `<|end|>`.
    Training,
    /// The conversation followed by the opening of the next message.
    Completion(Role),
}

impl HarmonyEncoding {
    /// Renders a single message.
    pub fn render(&self, message: &Message, options: Option<&RenderOptions>) -> HarmonyResult<Vec<Rank>> {
        let mut out = Vec::new();
        self.render_into(message, &mut out, options)?;
        Ok(out)
    }

    /// Renders a single message, appending to `into`.
    pub fn render_into(
        &self,
        message: &Message,
        into: &mut Vec<Rank>,
        options: Option<&RenderOptions>,
    ) -> HarmonyResult<()> {
        let options = options.copied().unwrap_or_default();
        self.render_message_into(0, message, into, options)
    }

    /// Renders a conversation as is.
    pub fn render_conversation<'a, I>(
        &self,
        conversation: I,
        config: Option<&RenderConversationConfig>,
    ) -> HarmonyResult<Vec<Rank>>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        self.render_conversation_with_purpose(conversation, RenderPurpose::Raw, config)
    }

    /// Renders a conversation as is, appending to `into`.
    pub fn render_conversation_into<'a, I>(
        &self,
        conversation: I,
        into: &mut Vec<Rank>,
        config: Option<&RenderConversationConfig>,
    ) -> HarmonyResult<()>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let messages: Vec<&Message> = conversation.into_iter().collect();
        self.render_messages_into(&messages, into, config.copied().unwrap_or_default())
    }

    /// Renders a conversation followed by `<|start|>{next_turn_role}`, the
    /// prompt for sampling the next message.
    pub fn render_conversation_for_completion<'a, I>(
        &self,
        conversation: I,
        next_turn_role: Role,
        config: Option<&RenderConversationConfig>,
    ) -> HarmonyResult<Vec<Rank>>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        self.render_conversation_with_purpose(
            conversation,
            RenderPurpose::Completion(next_turn_role),
            config,
        )
    }

    /// Renders a conversation as a training example.
    pub fn render_conversation_for_training<'a, I>(
        &self,
        conversation: I,
        config: Option<&RenderConversationConfig>,
    ) -> HarmonyResult<Vec<Rank>>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        self.render_conversation_with_purpose(conversation, RenderPurpose::Training, config)
    }

    pub fn render_conversation_with_purpose<'a, I>(
        &self,
        conversation: I,
        purpose: RenderPurpose,
        config: Option<&RenderConversationConfig>,
    ) -> HarmonyResult<Vec<Rank>>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let messages: Vec<&Message> = conversation.into_iter().collect();
        let mut out = Vec::new();
        self.render_messages_into(&messages, &mut out, config.copied().unwrap_or_default())?;

        match purpose {
            RenderPurpose::Raw => {}
            RenderPurpose::Training => {
                let ends_with_answer = messages.last().is_some_and(|m| {
                    m.author.role == Role::Assistant && m.channel.as_deref() == Some("final")
                });
                if ends_with_answer {
                    if let Some(last) = out.last_mut() {
                        *last = self.formatting().return_;
                    }
                }
            }
            RenderPurpose::Completion(role) => {
                out.push(self.formatting().start);
                self.render_text_into(role.as_str(), &mut out)?;
            }
        }
        Ok(out)
    }

    fn render_messages_into(
        &self,
        messages: &[&Message],
        into: &mut Vec<Rank>,
        config: RenderConversationConfig,
    ) -> HarmonyResult<()> {
        check_channels(messages)?;

        let options = RenderOptions {
            conversation_has_function_tools: messages.iter().any(|m| has_function_tools(m)),
        };
        let dropped = if config.auto_drop_analysis {
            superseded_analysis(messages)
        } else {
            vec![false; messages.len()]
        };

        let mut rendered = 0;
        for (idx, message) in messages.iter().enumerate() {
            if dropped[idx] {
                continue;
            }
            self.render_message_into(idx, message, into, options)?;
            rendered += 1;
        }
        debug!(
            messages = messages.len(),
            rendered,
            dropped_analysis = messages.len() - rendered,
            tokens = into.len(),
            "rendered conversation"
        );
        Ok(())
    }

    fn render_message_into(
        &self,
        index: usize,
        message: &Message,
        into: &mut Vec<Rank>,
        options: RenderOptions,
    ) -> HarmonyResult<()> {
        let tokens = *self.formatting();
        let role = message.author.role;
        check_header_values(index, message)?;

        into.push(tokens.start);
        if role == Role::Tool {
            let name = message.author.name.as_deref().ok_or_else(|| {
                ValidationError::required(format!("messages[{index}].name"))
                    .with_context("tool messages are rendered under the name of the tool")
            })?;
            self.render_text_into(name, into)?;
        } else {
            self.render_text_into(role.as_str(), into)?;
            if let Some(name) = &message.author.name {
                self.render_text_into(&format!(":{name}"), into)?;
            }
        }

        if let Some(recipient) = addressed_recipient(message) {
            self.render_text_into(&format!(" to={recipient}"), into)?;
        }

        if let Some(channel) = &message.channel {
            into.push(tokens.channel);
            self.render_text_into(channel, into)?;
        }

        if let Some(content_type) = message.content_type.as_ref().filter(|ct| **ct != ContentType::TEXT) {
            match content_type.strip_prefix(FormattingToken::ConstrainedFormat.surface()) {
                Some(rest) => {
                    self.render_text_into(" ", into)?;
                    into.push(tokens.constrain);
                    if !rest.is_empty() {
                        self.render_text_into(rest, into)?;
                    }
                }
                None => self.render_text_into(&format!(" {content_type}"), into)?,
            }
        }

        into.push(tokens.message);
        for (block, content) in message.content.iter().enumerate() {
            let path = format!("messages[{index}].content[{block}]");
            match content {
                Content::Text(text) => self.render_text_into(&text.text, into)?,
                Content::SystemContent(system) => {
                    expect_role(role, Role::System, &path, "system content")?;
                    self.render_text_into(&system_text(system, options, &path)?, into)?;
                }
                Content::DeveloperContent(developer) => {
                    expect_role(role, Role::Developer, &path, "developer content")?;
                    self.render_text_into(&developer_text(developer, &path)?, into)?;
                }
            }
        }

        let terminator = if role == Role::Assistant && addressed_recipient(message).is_some() {
            tokens.call
        } else {
            tokens.end
        };
        into.push(terminator);
        Ok(())
    }

    /// Encodes rendered text. Special token surfaces in it are an error.
    fn render_text_into(&self, text: &str, into: &mut Vec<Rank>) -> HarmonyResult<()> {
        if let Some((token, offset)) = self.tokenizer().find_special_token(text, |_| true) {
            return Err(HarmonyError::DisallowedSpecialToken {
                token: token.to_string(),
                offset,
            });
        }
        into.extend(self.tokenizer().encode_ordinary(text));
        Ok(())
    }
}

/// The recipient written into the header; `all` is implicit.
fn addressed_recipient(message: &Message) -> Option<&Recipient> {
    message.recipient.as_ref().filter(|r| **r != Recipient::ALL)
}

fn has_function_tools(message: &Message) -> bool {
    message.author.role == Role::Developer
        && message.content.iter().any(|content| match content {
            Content::DeveloperContent(developer) => developer.has_function_tools(),
            _ => false,
        })
}

/// Marks assistant `analysis` messages that a later `final` message of the
/// same user turn supersedes.
fn superseded_analysis(messages: &[&Message]) -> Vec<bool> {
    let mut dropped = vec![false; messages.len()];
    let mut answered = false;
    for (idx, message) in messages.iter().enumerate().rev() {
        match message.author.role {
            Role::User => answered = false,
            Role::Assistant => match message.channel.as_deref() {
                Some("final") => answered = true,
                Some("analysis") if answered => dropped[idx] = true,
                _ => {}
            },
            _ => {}
        }
    }
    dropped
}

const HEADER_WORD: &str = "a non-empty word without whitespace or '<'";

fn is_header_word(value: &str) -> bool {
    !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '<')
}

/// Rejects header values that would parse back as something else.
fn check_header_values(index: usize, message: &Message) -> Result<(), ValidationError> {
    let field = |name: &str| format!("messages[{index}].{name}");

    if let Some(name) = &message.author.name {
        if !is_header_word(name) {
            return Err(ValidationError::invalid_value(field("name"), HEADER_WORD, name.as_str()));
        }
        if message.author.role == Role::Tool && (split_role_slot(name).is_some() || name.starts_with("to=")) {
            return Err(ValidationError::invalid_value(field("name"), "a tool name", name.as_str())
                .with_context("the name would be read as a role or recipient"));
        }
    }

    if let Some(recipient) = addressed_recipient(message) {
        if !is_header_word(recipient) {
            return Err(ValidationError::invalid_value(field("recipient"), HEADER_WORD, recipient.as_str()));
        }
    }

    if let Some(channel) = &message.channel {
        if !is_header_word(channel) {
            return Err(ValidationError::invalid_value(field("channel"), HEADER_WORD, channel.as_str()));
        }
    }

    if let Some(content_type) = message.content_type.as_ref().filter(|ct| **ct != ContentType::TEXT) {
        let valid = match content_type.strip_prefix(FormattingToken::ConstrainedFormat.surface()) {
            Some(rest) => rest.is_empty() || is_header_word(rest),
            None => is_header_word(content_type) && !content_type.starts_with("to="),
        };
        if !valid {
            return Err(ValidationError::invalid_value(
                field("content_type"),
                HEADER_WORD,
                content_type.as_str(),
            ));
        }
    }
    Ok(())
}

/// Rejects assistant channels missing from the latest system channel config.
fn check_channels(messages: &[&Message]) -> Result<(), ValidationError> {
    let mut active: Option<&ChannelConfig> = None;
    for (idx, message) in messages.iter().enumerate() {
        for content in &message.content {
            if let Content::SystemContent(system) = content {
                if let Some(config) = system.channel_config.as_ref() {
                    active = Some(config).filter(|c| !c.valid_channels.is_empty());
                }
            }
        }

        if message.author.role != Role::Assistant {
            continue;
        }
        if let (Some(config), Some(channel)) = (active, message.channel.as_ref()) {
            if !config.is_valid(channel) {
                let valid: Vec<&str> = config.valid_channels.iter().map(|c| c.as_str()).collect();
                return Err(ValidationError::invalid_value(
                    format!("messages[{idx}].channel"),
                    format!("one of [{}]", valid.join(", ")),
                    channel.as_str(),
                ));
            }
        }
    }
    Ok(())
}

fn expect_role(role: Role, expected: Role, path: &str, what: &str) -> Result<(), ValidationError> {
    if role == expected {
        return Ok(());
    }
    Err(ValidationError::new(
        path,
        ValidationErrorKind::Incompatible {
            message: format!("{what} is only allowed in {expected} messages, found in a {role} message"),
        },
    ))
}

fn system_text(system: &SystemContent, options: RenderOptions, path: &str) -> Result<String, ValidationError> {
    let mut sections = Vec::new();

    let mut intro = Vec::new();
    if let Some(identity) = &system.model_identity {
        intro.push(identity.clone());
    }
    if let Some(cutoff) = &system.knowledge_cutoff {
        intro.push(format!("Knowledge cutoff: {cutoff}"));
    }
    if let Some(date) = &system.conversation_start_date {
        intro.push(format!("Current date: {date}"));
    }
    if !intro.is_empty() {
        sections.push(intro.join("\n"));
    }

    if let Some(effort) = system.reasoning_effort {
        sections.push(format!("Reasoning: {effort}"));
    }

    if let Some(tools) = system.tools.as_ref().filter(|t| !t.is_empty()) {
        sections.push(tools_section(tools, path)?);
    }

    if let Some(config) = system.channel_config.as_ref().filter(|c| !c.valid_channels.is_empty()) {
        let names: Vec<&str> = config.valid_channels.iter().map(|c| c.as_str()).collect();
        let mut text = format!("# Valid channels: {}.", names.join(", "));
        if config.channel_required {
            text.push_str(" Channel must be included for every message.");
        }
        if options.conversation_has_function_tools {
            text.push_str("\nCalls to these tools must go to the commentary channel: 'functions'.");
        }
        sections.push(text);
    }

    Ok(sections.join("\n\n"))
}

fn developer_text(developer: &DeveloperContent, path: &str) -> Result<String, ValidationError> {
    let mut sections = Vec::new();
    if let Some(instructions) = &developer.instructions {
        sections.push(format!("# Instructions\n\n{instructions}"));
    }
    if let Some(tools) = developer.tools.as_ref().filter(|t| !t.is_empty()) {
        sections.push(tools_section(tools, path)?);
    }
    Ok(sections.join("\n\n"))
}

fn tools_section(
    tools: &BTreeMap<String, ToolNamespaceConfig>,
    path: &str,
) -> Result<String, ValidationError> {
    let mut namespaces = Vec::with_capacity(tools.len());
    for (key, namespace) in tools {
        let ns_path = format!("{path}.tools.{key}");
        if *key != namespace.name {
            return Err(ValidationError::invalid_value(
                format!("{ns_path}.name"),
                key.as_str(),
                namespace.name.as_str(),
            )
            .with_context("tool namespaces must be keyed by their own name"));
        }
        let mut seen = HashSet::new();
        for tool in &namespace.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ValidationError::new(
                    format!("{ns_path}.tools"),
                    ValidationErrorKind::DuplicateValue {
                        value: tool.name.clone(),
                    },
                ));
            }
        }
        namespaces.push(render_namespace(namespace));
    }
    Ok(format!("# Tools\n\n{}", namespaces.join("\n\n")))
}
