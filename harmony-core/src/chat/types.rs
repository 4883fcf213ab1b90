//! Message, content and conversation types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::names::{Channel, ContentType, Recipient};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Model identity, reasoning level, built-in tools and channel rules
    System,
    /// Instructions and function tools supplied by the application
    Developer,
    User,
    Assistant,
    /// Output of a tool; the author name identifies the tool
    Tool,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "system" => Ok(Role::System),
            "developer" => Ok(Role::Developer),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::try_from(s)
    }
}

/// Role plus an optional name, e.g. the tool that produced a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Author {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: Some(name.into()),
        }
    }
}

impl From<Role> for Author {
    fn from(role: Role) -> Self {
        Self { role, name: None }
    }
}

/// Plain text content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// How much reasoning the model should do before answering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channels the assistant may write to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub valid_channels: Vec<Channel>,
    #[serde(default)]
    pub channel_required: bool,
}

impl ChannelConfig {
    /// A config that lists `channels` and requires one on every message.
    pub fn require_channels<I, C>(channels: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Channel>,
    {
        Self {
            valid_channels: channels.into_iter().map(Into::into).collect(),
            channel_required: true,
        }
    }

    pub fn is_valid(&self, channel: &str) -> bool {
        self.valid_channels.iter().any(|c| c.as_str() == channel)
    }
}

/// One callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDescription {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A named group of tools rendered as one TypeScript-like namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolNamespaceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescription>,
}

impl ToolNamespaceConfig {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        tools: Vec<ToolDescription>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            tools,
        }
    }
}

/// Structured content of a system message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_cutoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_config: Option<ChannelConfig>,
    /// Built-in tool namespaces keyed by namespace name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, ToolNamespaceConfig>>,
}

impl Default for SystemContent {
    fn default() -> Self {
        Self {
            model_identity: Some(
                "You are ChatGPT, a large language model trained by OpenAI.".to_string(),
            ),
            reasoning_effort: Some(ReasoningEffort::Medium),
            conversation_start_date: None,
            knowledge_cutoff: Some("2024-06".to_string()),
            channel_config: Some(ChannelConfig::require_channels([
                Channel::ANALYSIS,
                Channel::COMMENTARY,
                Channel::FINAL,
            ])),
            tools: None,
        }
    }
}

impl SystemContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// System content with every field unset.
    pub fn empty() -> Self {
        Self {
            model_identity: None,
            reasoning_effort: None,
            conversation_start_date: None,
            knowledge_cutoff: None,
            channel_config: None,
            tools: None,
        }
    }

    pub fn with_model_identity(mut self, model_identity: impl Into<String>) -> Self {
        self.model_identity = Some(model_identity.into());
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_conversation_start_date(mut self, date: impl Into<String>) -> Self {
        self.conversation_start_date = Some(date.into());
        self
    }

    pub fn with_knowledge_cutoff(mut self, cutoff: impl Into<String>) -> Self {
        self.knowledge_cutoff = Some(cutoff.into());
        self
    }

    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = Some(config);
        self
    }

    pub fn with_required_channels<I, C>(self, channels: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Channel>,
    {
        self.with_channel_config(ChannelConfig::require_channels(channels))
    }

    /// Adds a tool namespace, replacing one with the same name.
    pub fn with_tools(mut self, namespace: ToolNamespaceConfig) -> Self {
        self.tools
            .get_or_insert_with(BTreeMap::new)
            .insert(namespace.name.clone(), namespace);
        self
    }
}

/// Structured content of a developer message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeveloperContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, ToolNamespaceConfig>>,
}

impl DeveloperContent {
    /// Name of the namespace that holds application function tools.
    pub const FUNCTIONS_NAMESPACE: &'static str = "functions";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Adds a tool namespace, replacing one with the same name.
    pub fn with_tools(mut self, namespace: ToolNamespaceConfig) -> Self {
        self.tools
            .get_or_insert_with(BTreeMap::new)
            .insert(namespace.name.clone(), namespace);
        self
    }

    /// Sets the tools of the `functions` namespace.
    pub fn with_function_tools(self, tools: Vec<ToolDescription>) -> Self {
        self.with_tools(ToolNamespaceConfig::new(
            Self::FUNCTIONS_NAMESPACE,
            None,
            tools,
        ))
    }

    /// Returns `true` when the `functions` namespace declares at least one tool.
    pub fn has_function_tools(&self) -> bool {
        self.tools
            .as_ref()
            .and_then(|tools| tools.get(Self::FUNCTIONS_NAMESPACE))
            .is_some_and(|ns| !ns.tools.is_empty())
    }
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    SystemContent(SystemContent),
    DeveloperContent(DeveloperContent),
}

impl Content {
    /// The text of a plain text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(TextContent {
            text: text.to_string(),
        })
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(TextContent { text })
    }
}

impl From<SystemContent> for Content {
    fn from(content: SystemContent) -> Self {
        Content::SystemContent(content)
    }
}

impl From<DeveloperContent> for Content {
    fn from(content: DeveloperContent) -> Self {
        Content::DeveloperContent(content)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub author: Author,

    /// A plain string is accepted and read as one text block.
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Recipient>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<Content>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ContentRepr {
        Text(String),
        Blocks(Vec<Content>),
    }

    Ok(match ContentRepr::deserialize(deserializer)? {
        ContentRepr::Text(text) => vec![Content::from(text)],
        ContentRepr::Blocks(blocks) => blocks,
    })
}

impl Message {
    pub fn from_author_and_content(author: Author, content: impl Into<Content>) -> Self {
        Self {
            author,
            content: vec![content.into()],
            recipient: None,
            channel: None,
            content_type: None,
        }
    }

    pub fn from_role_and_content(role: Role, content: impl Into<Content>) -> Self {
        Self::from_author_and_content(Author::from(role), content)
    }

    /// A message with several content blocks.
    pub fn from_role_and_contents<I>(role: Role, contents: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Content>,
    {
        Self {
            author: Author::from(role),
            content: contents.into_iter().map(Into::into).collect(),
            recipient: None,
            channel: None,
            content_type: None,
        }
    }

    pub fn adding_content(mut self, content: impl Into<Content>) -> Self {
        self.content.push(content.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<Channel>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<Recipient>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<ContentType>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author.name = Some(name.into());
        self
    }

    /// Concatenation of all plain text blocks.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Content::as_text).collect()
    }
}

/// An ordered list of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = Message>,
    {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl FromIterator<Message> for Conversation {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self::from_messages(iter)
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::System, Role::Developer, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
        assert!(Role::try_from("functions.lookup").is_err());
    }

    #[test]
    fn test_message_builder() {
        let message = Message::from_role_and_content(Role::Assistant, "hi")
            .with_channel("commentary")
            .with_recipient("functions.get_weather")
            .with_content_type(ContentType::CONSTRAINED_JSON)
            .adding_content(" there");
        assert_eq!(message.channel, Some(Channel::COMMENTARY));
        assert_eq!(message.recipient.as_deref(), Some("functions.get_weather"));
        assert_eq!(message.text(), "hi there");
    }

    #[test]
    fn test_message_json_shape() {
        let message = Message::from_author_and_content(
            Author::new(Role::Tool, "functions.get_weather"),
            "{\"temp\": 20}",
        )
        .with_channel(Channel::COMMENTARY);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "tool",
                "name": "functions.get_weather",
                "content": [{"type": "text", "text": "{\"temp\": 20}"}],
                "channel": "commentary",
            })
        );
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_message_accepts_string_content() {
        let message: Message =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).unwrap();
        assert_eq!(message, Message::from_role_and_content(Role::User, "hello"));
    }

    #[test]
    fn test_system_content_defaults() {
        let system = SystemContent::default();
        assert_eq!(system.reasoning_effort, Some(ReasoningEffort::Medium));
        assert_eq!(system.knowledge_cutoff.as_deref(), Some("2024-06"));
        let channels = system.channel_config.unwrap();
        assert!(channels.channel_required);
        assert!(channels.is_valid("analysis"));
        assert!(!channels.is_valid("scratch"));
        assert_eq!(SystemContent::empty().model_identity, None);
    }

    #[test]
    fn test_system_content_json() {
        let content: Content = serde_json::from_value(json!({
            "type": "system_content",
            "reasoning_effort": "high",
            "conversation_start_date": "2025-06-28",
        }))
        .unwrap();
        let Content::SystemContent(system) = content else {
            panic!("expected system content");
        };
        assert_eq!(system.reasoning_effort, Some(ReasoningEffort::High));
        assert_eq!(system.model_identity, None);
    }

    #[test]
    fn test_function_tools_namespace() {
        let developer = DeveloperContent::new().with_function_tools(vec![ToolDescription::new(
            "get_location",
            "Gets the location of the user.",
            None,
        )]);
        assert!(developer.has_function_tools());
        assert!(!DeveloperContent::new().with_function_tools(vec![]).has_function_tools());
        let tools = developer.tools.unwrap();
        assert_eq!(tools["functions"].tools[0].name, "get_location");
    }
}
