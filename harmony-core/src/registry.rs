//! Named Harmony encodings and their vocabularies.
//!
//! The gpt-oss models use `o200k_harmony`: the `o200k_base` ranks plus the
//! Harmony special tokens. The ranks are read from a tiktoken file in the
//! directory named by `TIKTOKEN_ENCODINGS_BASE`; nothing is downloaded.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::encoding::HarmonyEncoding;
use crate::error::HarmonyResult;
use crate::tokenizer::{load_tiktoken_bpe, load_tiktoken_bpe_file, CoreBpe, Rank, VocabError};

/// Environment variable naming the directory that holds vocabulary files.
pub const VOCAB_DIR_ENV: &str = "TIKTOKEN_ENCODINGS_BASE";

/// Pre-tokenization pattern of `o200k_base`.
pub const O200K_PATTERN: &str = concat!(
    r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n/]*",
    r"|\s*[\r\n]+",
    r"|\s+(?!\S)",
    r"|\s+",
);

const FIRST_RESERVED: Rank = 200_013;
const LAST_RESERVED: Rank = 201_088;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarmonyEncodingName {
    /// `o200k_harmony`, used by gpt-oss.
    HarmonyGptOss,
}

impl HarmonyEncodingName {
    pub const ALL: [HarmonyEncodingName; 1] = [HarmonyEncodingName::HarmonyGptOss];

    pub const fn as_str(&self) -> &'static str {
        match self {
            HarmonyEncodingName::HarmonyGptOss => "HarmonyGptOss",
        }
    }

    /// File name of the ordinary vocabulary.
    pub const fn vocabulary_file(&self) -> &'static str {
        match self {
            HarmonyEncodingName::HarmonyGptOss => "o200k_base.tiktoken",
        }
    }

    pub const fn pattern(&self) -> &'static str {
        match self {
            HarmonyEncodingName::HarmonyGptOss => O200K_PATTERN,
        }
    }

    /// Special tokens layered on top of the ordinary vocabulary.
    pub fn special_tokens(&self) -> FxHashMap<String, Rank> {
        match self {
            HarmonyEncodingName::HarmonyGptOss => o200k_harmony_special_tokens(),
        }
    }
}

impl fmt::Display for HarmonyEncodingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarmonyEncodingName {
    type Err = VocabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HarmonyGptOss" | "harmony_gpt_oss" | "o200k_harmony" => {
                Ok(HarmonyEncodingName::HarmonyGptOss)
            }
            other => Err(VocabError::UnknownEncoding(other.to_string())),
        }
    }
}

fn o200k_harmony_special_tokens() -> FxHashMap<String, Rank> {
    let named = [
        ("<|startoftext|>", 199_998),
        ("<|endoftext|>", 199_999),
        ("<|reserved_200000|>", 200_000),
        ("<|reserved_200001|>", 200_001),
        ("<|return|>", 200_002),
        ("<|constrain|>", 200_003),
        ("<|reserved_200004|>", 200_004),
        ("<|channel|>", 200_005),
        ("<|start|>", 200_006),
        ("<|end|>", 200_007),
        ("<|message|>", 200_008),
        ("<|reserved_200009|>", 200_009),
        ("<|reserved_200010|>", 200_010),
        ("<|reserved_200011|>", 200_011),
        ("<|call|>", 200_012),
    ];
    let mut tokens: FxHashMap<String, Rank> = named
        .into_iter()
        .map(|(surface, rank)| (surface.to_string(), rank))
        .collect();
    tokens.extend((FIRST_RESERVED..=LAST_RESERVED).map(|rank| (format!("<|reserved_{rank}|>"), rank)));
    tokens
}

/// Loads an encoding from the vocabulary directory in `TIKTOKEN_ENCODINGS_BASE`.
pub fn load_harmony_encoding(name: HarmonyEncodingName) -> HarmonyResult<HarmonyEncoding> {
    let dir = std::env::var_os(VOCAB_DIR_ENV)
        .ok_or(VocabError::MissingVocabularyLocation { var: VOCAB_DIR_ENV })?;
    let path = PathBuf::from(dir).join(name.vocabulary_file());
    load_harmony_encoding_from_file(name, path)
}

/// Loads an encoding from an explicit vocabulary file.
pub fn load_harmony_encoding_from_file(
    name: HarmonyEncodingName,
    path: impl AsRef<Path>,
) -> HarmonyResult<HarmonyEncoding> {
    let path = path.as_ref();
    debug!(encoding = %name, path = %path.display(), "loading vocabulary");
    let ranks = load_tiktoken_bpe_file(path)?;
    let encoding = HarmonyEncoding::from_ranks(name, ranks)?;
    info!(encoding = %name, n_vocab = encoding.tokenizer().n_vocab(), "loaded harmony encoding");
    Ok(encoding)
}

/// Loads an encoding from tiktoken vocabulary data already in memory.
pub fn load_harmony_encoding_from_bytes(
    name: HarmonyEncodingName,
    data: &[u8],
) -> HarmonyResult<HarmonyEncoding> {
    HarmonyEncoding::from_ranks(name, load_tiktoken_bpe(data)?)
}

impl HarmonyEncoding {
    /// Builds an encoding from ordinary ranks, adding the special tokens of
    /// `name`.
    pub fn from_ranks<I>(name: HarmonyEncodingName, ranks: I) -> HarmonyResult<Self>
    where
        I: IntoIterator<Item = (Vec<u8>, Rank)>,
    {
        let tokenizer = CoreBpe::new(ranks.into_iter().collect(), name.special_tokens(), name.pattern())?;
        HarmonyEncoding::new(name, tokenizer)
    }
}
