//! Property-based tests for the encoding.
//!
//! Tests validate:
//! 1. Ordinary text survives encode then decode
//! 2. Rendered conversations parse back into the same messages
//! 3. The streaming parser agrees with the batch parser on any token sequence
//! 4. Header values that cannot be parsed back are rejected when rendering

mod common;

use common::*;
use harmony_core::chat::{Author, Channel, DeveloperContent, Message, Role, SystemContent};
use harmony_core::{
    HarmonyError, HarmonyResult, ParseOptions, Rank, RenderConversationConfig, SpecialTokenPolicy,
    StreamableParser,
};
use proptest::prelude::*;

fn stream(tokens: &[Rank], role: Option<Role>, options: ParseOptions) -> HarmonyResult<Vec<Message>> {
    let mut parser = StreamableParser::new_with_options(encoding(), role, options);
    for &token in tokens {
        parser.process(token)?;
    }
    parser.finish()
}

const TEXT: &str = "[a-zA-Z0-9 .,!?éü中]{1,40}";

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        TEXT.prop_map(|t| Message::from_role_and_content(Role::User, t)),
        TEXT.prop_map(|t| Message::from_author_and_content(Author::new(Role::User, "alice"), t)),
        (
            TEXT,
            prop_oneof![Just(Channel::FINAL), Just(Channel::COMMENTARY), Just(Channel::ANALYSIS)]
        )
            .prop_map(|(t, channel)| Message::from_role_and_content(Role::Assistant, t).with_channel(channel)),
        TEXT.prop_map(|t| {
            Message::from_role_and_content(Role::Assistant, t)
                .with_channel(Channel::COMMENTARY)
                .with_recipient("functions.lookup")
        }),
        TEXT.prop_map(|t| {
            Message::from_author_and_content(Author::new(Role::Tool, "functions.lookup"), t)
                .with_channel(Channel::COMMENTARY)
                .with_recipient("assistant")
        }),
    ]
}

/// System or developer messages placed before the conversation.
fn preamble_strategy() -> impl Strategy<Value = Vec<Message>> {
    prop_oneof![
        Just(Vec::new()),
        Just(vec![Message::from_role_and_content(Role::System, SystemContent::new())]),
        TEXT.prop_map(|t| {
            vec![
                Message::from_role_and_content(Role::System, SystemContent::new()),
                Message::from_role_and_content(Role::Developer, DeveloperContent::new().with_instructions(t)),
            ]
        }),
    ]
}

/// Messages expected to survive rendering with analysis auto-drop on.
fn without_superseded_analysis(messages: &[Message]) -> Vec<Message> {
    let is_assistant_on = |m: &Message, channel: &str| {
        m.author.role == Role::Assistant && m.channel.as_deref() == Some(channel)
    };
    messages
        .iter()
        .enumerate()
        .filter(|(idx, message)| {
            if !is_assistant_on(message, "analysis") {
                return true;
            }
            !messages[idx + 1..]
                .iter()
                .take_while(|later| later.author.role != Role::User)
                .any(|later| is_assistant_on(later, "final"))
        })
        .map(|(_, message)| message.clone())
        .collect()
}

fn token_strategy() -> impl Strategy<Value = Rank> {
    prop_oneof![
        4 => 0u32..256,
        1 => Just(HELLO),
        1 => Just(WORLD),
        1 => Just(START),
        1 => Just(MESSAGE),
        1 => Just(CHANNEL),
        1 => Just(END),
        1 => Just(CALL),
        1 => Just(RETURN),
        1 => Just(CONSTRAIN),
    ]
}

// ===== Property 1: Encode / Decode =====

proptest! {
    #[test]
    fn ordinary_text_round_trips(text in any::<String>()) {
        let enc = encoding();
        let tokens = enc.encode(&text, &SpecialTokenPolicy::DisableChecks).unwrap();
        prop_assert_eq!(enc.decode_utf8(&tokens).unwrap(), text);
    }

    #[test]
    fn text_without_markers_passes_default_policy(text in "[^<]*") {
        let enc = encoding();
        prop_assert!(enc.encode(&text, &SpecialTokenPolicy::default()).is_ok());
    }
}

// ===== Property 2: Render / Parse =====

proptest! {
    #[test]
    fn rendered_conversation_parses_back(messages in prop::collection::vec(message_strategy(), 1..6)) {
        let enc = encoding();
        let config = RenderConversationConfig { auto_drop_analysis: false };
        let tokens = enc.render_conversation(&messages, Some(&config)).unwrap();
        let parsed = enc.parse_messages_from_completion_tokens(tokens.clone(), None).unwrap();
        prop_assert_eq!(&parsed, &messages);

        let streamed = stream(&tokens, None, ParseOptions::default()).unwrap();
        prop_assert_eq!(streamed, messages);
    }

    #[test]
    fn auto_drop_keeps_only_unanswered_analysis(messages in prop::collection::vec(message_strategy(), 1..8)) {
        let enc = encoding();
        let tokens = enc.render_conversation(&messages, None).unwrap();
        let parsed = enc.parse_messages_from_completion_tokens(tokens, None).unwrap();
        prop_assert_eq!(parsed, without_superseded_analysis(&messages));
    }

    #[test]
    fn preamble_parses_back_under_its_role(
        preamble in preamble_strategy(),
        messages in prop::collection::vec(message_strategy(), 1..5),
    ) {
        let enc = encoding();
        let config = RenderConversationConfig { auto_drop_analysis: false };
        let all: Vec<Message> = preamble.iter().chain(&messages).cloned().collect();
        let tokens = enc.render_conversation(&all, Some(&config)).unwrap();
        let parsed = enc.parse_messages_from_completion_tokens(tokens, None).unwrap();

        prop_assert_eq!(parsed.len(), all.len());
        for (parsed, expected) in parsed.iter().zip(&preamble) {
            prop_assert_eq!(parsed.author.role, expected.author.role);
            prop_assert!(!parsed.text().is_empty());
        }
        prop_assert_eq!(&parsed[preamble.len()..], &messages[..]);
    }
}

// ===== Property 3: Streaming equals batch =====

proptest! {
    #[test]
    fn streaming_matches_batch(
        tokens in prop::collection::vec(token_strategy(), 0..40),
        seeded in prop_oneof![Just(None), Just(Some(Role::Assistant))],
        strict in any::<bool>(),
    ) {
        let enc = encoding();
        let options = ParseOptions { strict };
        let batch = enc.parse_messages_from_completion_tokens_with_options(tokens.clone(), seeded, options);
        let streamed = stream(&tokens, seeded, options);
        prop_assert_eq!(batch.is_ok(), streamed.is_ok());
        prop_assert_eq!(batch.ok(), streamed.ok());
    }
}

// ===== Property 4: Unparseable header values =====

proptest! {
    #[test]
    fn channel_with_separator_is_rejected(channel in "[a-z]{1,6}[ \t<][a-z]{0,6}", text in TEXT) {
        let message = Message::from_role_and_content(Role::Assistant, text).with_channel(channel.as_str());
        match encoding().render(&message, None) {
            Err(HarmonyError::Configuration(err)) => {
                prop_assert_eq!(err.field_path, "messages[0].channel")
            }
            other => prop_assert!(false, "expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn recipient_with_separator_is_rejected(recipient in "[a-z]{1,6}[ \n<][a-z.]{0,6}", text in TEXT) {
        let message = Message::from_role_and_content(Role::Assistant, text)
            .with_channel(Channel::COMMENTARY)
            .with_recipient(recipient.as_str());
        match encoding().render(&message, None) {
            Err(HarmonyError::Configuration(err)) => {
                prop_assert_eq!(err.field_path, "messages[0].recipient")
            }
            other => prop_assert!(false, "expected a configuration error, got {:?}", other),
        }
    }
}
