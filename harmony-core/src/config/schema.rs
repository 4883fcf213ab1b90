//! Configuration schema structures with serde support

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::{ConfigError, ValidationError, ValidationErrorKind};
use crate::encoding::{HarmonyEncoding, ParseOptions, RenderConversationConfig};
use crate::error::HarmonyResult;
use crate::registry::{load_harmony_encoding, load_harmony_encoding_from_file, HarmonyEncodingName};

/// Root configuration for loading and using a Harmony encoding
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HarmonyConfig {
    /// Which encoding to load
    #[serde(default = "default_encoding")]
    pub encoding: HarmonyEncodingName,

    /// Explicit vocabulary file; when unset the file is looked up in
    /// `TIKTOKEN_ENCODINGS_BASE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocab_file: Option<PathBuf>,

    /// Conversation rendering defaults
    #[serde(default)]
    pub render: RenderConversationConfig,

    /// Completion parsing defaults
    #[serde(default)]
    pub parse: ParseOptions,
}

fn default_encoding() -> HarmonyEncodingName {
    HarmonyEncodingName::HarmonyGptOss
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            vocab_file: None,
            render: RenderConversationConfig::default(),
            parse: ParseOptions::default(),
        }
    }
}

impl HarmonyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(path) = &self.vocab_file {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::required("vocab_file")
                    .with_context("remove the key to use TIKTOKEN_ENCODINGS_BASE"));
            }
            let expected = self.encoding.vocabulary_file();
            if path.is_dir() {
                return Err(ValidationError::new(
                    "vocab_file",
                    ValidationErrorKind::Incompatible {
                        message: format!("'{}' is a directory, expected the {expected} file", path.display()),
                    },
                ));
            }
        }
        Ok(())
    }

    /// Loads the configured encoding
    pub fn load_encoding(&self) -> HarmonyResult<HarmonyEncoding> {
        self.validate().map_err(ConfigError::from)?;
        match &self.vocab_file {
            Some(path) => load_harmony_encoding_from_file(self.encoding, path),
            None => load_harmony_encoding(self.encoding),
        }
    }
}
