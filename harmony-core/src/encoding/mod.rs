//! The Harmony encoding: rendering conversations to tokens and parsing
//! completions back into messages.
//!
//! Every message on the wire has the shape
//!
//! ```text
//! <|start|>{header}<|message|>{body}{terminator}
//! ```
//!
//! where the header names the author and carries optional recipient, channel
//! and content type, and the terminator is `<|end|>`, `<|call|>` or
//! `<|return|>`.

mod grammar;
mod parse;
mod render;
mod stream;
mod typescript;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HarmonyError, HarmonyResult};
use crate::registry::HarmonyEncodingName;
use crate::tokenizer::{decode_lossy_per_byte, CoreBpe, Rank};

pub use grammar::{FormattingToken, ParsedHeader};
pub(crate) use grammar::FormattingTokenIds;
pub use parse::{ParseOptions, ParsedAssistant};
pub use render::{RenderConversationConfig, RenderOptions, RenderPurpose};
pub use stream::{StreamDelta, StreamState, StreamableParser};
pub use typescript::{render_namespace, schema_to_typescript};

/// Which special token surfaces `encode` may turn into special tokens.
///
/// Surfaces that are allowed become their special id. Surfaces that are
/// disallowed make `encode` fail. Everything else is encoded as plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpecialTokenPolicy {
    /// Any special token text is an error.
    #[default]
    DisallowAll,
    /// Only the listed surfaces become special tokens; the rest are errors.
    Allow(BTreeSet<String>),
    /// Every special token surface becomes its special token.
    AllowAll,
    /// Only the listed surfaces are errors; everything else is plain text.
    Disallow(BTreeSet<String>),
    /// Special token text is encoded as plain text without checks.
    DisableChecks,
}

impl SpecialTokenPolicy {
    pub fn allow<I, S>(surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Allow(surfaces.into_iter().map(Into::into).collect())
    }

    pub fn disallow<I, S>(surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Disallow(surfaces.into_iter().map(Into::into).collect())
    }
}

/// How `decode` treats bytes that are not valid UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Invalid UTF-8 is an error.
    #[default]
    Strict,
    /// Each byte of an invalid sequence is replaced with U+FFFD.
    Replace,
}

/// A tokenizer bound to the Harmony message grammar.
///
/// Cloning is cheap; the vocabulary is shared.
#[derive(Clone)]
pub struct HarmonyEncoding {
    name: HarmonyEncodingName,
    tokenizer: Arc<CoreBpe>,
    formatting: FormattingTokenIds,
}

impl HarmonyEncoding {
    /// Binds `tokenizer` to the Harmony grammar.
    ///
    /// Fails when the tokenizer lacks one of the formatting special tokens.
    pub fn new(name: HarmonyEncodingName, tokenizer: CoreBpe) -> HarmonyResult<Self> {
        let formatting = FormattingTokenIds::resolve(&tokenizer)?;
        Ok(Self {
            name,
            tokenizer: Arc::new(tokenizer),
            formatting,
        })
    }

    pub fn name(&self) -> HarmonyEncodingName {
        self.name
    }

    pub fn tokenizer(&self) -> &CoreBpe {
        &self.tokenizer
    }

    pub(crate) fn formatting(&self) -> &FormattingTokenIds {
        &self.formatting
    }

    /// Id of a formatting token.
    pub fn formatting_token(&self, token: FormattingToken) -> Rank {
        self.formatting.get(token)
    }

    /// Tokens that end sampling: `<|return|>`, `<|call|>` and `<|end|>`.
    pub fn stop_tokens(&self) -> BTreeSet<Rank> {
        [
            FormattingToken::EndMessageDoneSampling,
            FormattingToken::EndMessageAssistantToTool,
            FormattingToken::EndMessage,
        ]
        .into_iter()
        .map(|t| self.formatting.get(t))
        .collect()
    }

    /// Tokens that end an assistant action: `<|return|>` and `<|call|>`.
    pub fn stop_tokens_for_assistant_actions(&self) -> BTreeSet<Rank> {
        [
            FormattingToken::EndMessageDoneSampling,
            FormattingToken::EndMessageAssistantToTool,
        ]
        .into_iter()
        .map(|t| self.formatting.get(t))
        .collect()
    }

    /// Encodes text under a special token policy.
    ///
    /// When several disallowed surfaces occur, the error reports the one with
    /// the lowest byte offset, ties broken lexicographically.
    pub fn encode(&self, text: &str, policy: &SpecialTokenPolicy) -> HarmonyResult<Vec<Rank>> {
        let specials = self.tokenizer.special_tokens();
        match policy {
            SpecialTokenPolicy::DisableChecks => Ok(self.tokenizer.encode_ordinary(text)),
            SpecialTokenPolicy::AllowAll => Ok(self.tokenizer.encode_with_special_tokens(text)),
            SpecialTokenPolicy::DisallowAll => {
                self.check_disallowed(text, |_| true)?;
                Ok(self.tokenizer.encode_ordinary(text))
            }
            SpecialTokenPolicy::Allow(allowed) => {
                self.check_disallowed(text, |s| !allowed.contains(s))?;
                let allowed: HashSet<&str> = specials
                    .iter()
                    .map(String::as_str)
                    .filter(|s| allowed.contains(*s))
                    .collect();
                Ok(self.tokenizer.encode(text, &allowed))
            }
            SpecialTokenPolicy::Disallow(disallowed) => {
                self.check_disallowed(text, |s| disallowed.contains(s))?;
                Ok(self.tokenizer.encode_ordinary(text))
            }
        }
    }

    fn check_disallowed<F>(&self, text: &str, disallowed: F) -> HarmonyResult<()>
    where
        F: Fn(&str) -> bool,
    {
        match self.tokenizer.find_special_token(text, disallowed) {
            Some((token, offset)) => Err(HarmonyError::DisallowedSpecialToken {
                token: token.to_string(),
                offset,
            }),
            None => Ok(()),
        }
    }

    /// Decodes tokens to text.
    pub fn decode(&self, tokens: &[Rank], mode: DecodeMode) -> HarmonyResult<String> {
        match mode {
            DecodeMode::Strict => Ok(self.tokenizer.decode_utf8(tokens)?),
            DecodeMode::Replace => {
                let bytes = self.tokenizer.decode_bytes(tokens)?;
                Ok(decode_lossy_per_byte(&bytes))
            }
        }
    }

    /// Decodes tokens to text, failing on invalid UTF-8.
    pub fn decode_utf8(&self, tokens: &[Rank]) -> HarmonyResult<String> {
        self.decode(tokens, DecodeMode::Strict)
    }

    pub fn decode_bytes(&self, tokens: &[Rank]) -> HarmonyResult<Vec<u8>> {
        Ok(self.tokenizer.decode_bytes(tokens)?)
    }

    /// All special token surfaces, sorted lexicographically.
    pub fn special_tokens(&self) -> &[String] {
        self.tokenizer.special_tokens()
    }

    pub fn is_special_token(&self, token: Rank) -> bool {
        self.tokenizer.is_special_token(token)
    }
}

impl fmt::Debug for HarmonyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarmonyEncoding")
            .field("name", &self.name)
            .field("tokenizer", &self.tokenizer)
            .finish()
    }
}
