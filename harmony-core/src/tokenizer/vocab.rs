//! Loading of tiktoken vocabulary files.
//!
//! A tiktoken file holds one token per line: the base64 encoding of the
//! token bytes, a space, and the decimal rank.
//!
//! ```text
//! aGVsbG8= 24912
//! IHdvcmxk 2375
//! ```

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::tiktoken::Rank;

/// Errors raised while loading a vocabulary or building a tokenizer from it.
#[derive(Debug, Error)]
pub enum VocabError {
    #[error("invalid base64 on line {line}: {source}")]
    Base64 {
        line: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid vocabulary line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("failed to read vocabulary file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable {var} is not set; cannot locate vocabulary files")]
    MissingVocabularyLocation { var: &'static str },

    #[error("vocabulary has no token for byte 0x{0:02x}")]
    MissingByte(u8),

    #[error("rank {rank} is assigned to both an ordinary and a special token")]
    DuplicateRank { rank: Rank },

    #[error("vocabulary does not define the special token {0}")]
    MissingSpecialToken(String),

    #[error("invalid pre-tokenization pattern: {0}")]
    Pattern(String),

    #[error("failed to build special-token matcher: {0}")]
    SpecialTokenMatcher(#[from] aho_corasick::BuildError),

    #[error("unknown encoding name '{0}'")]
    UnknownEncoding(String),
}

/// Parses tiktoken vocabulary data into a byte-sequence → rank table.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let mut encoder = FxHashMap::default();

    for (idx, line) in data.split(|&b| b == b'\n').enumerate() {
        let line_no = idx + 1;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos = line
            .iter()
            .rposition(|&b| b == b' ')
            .ok_or_else(|| VocabError::Parse {
                line: line_no,
                message: "missing space separator".to_string(),
            })?;

        let token = STANDARD
            .decode(&line[..space_pos])
            .map_err(|source| VocabError::Base64 {
                line: line_no,
                source,
            })?;

        let rank = std::str::from_utf8(&line[space_pos + 1..])
            .ok()
            .and_then(|s| s.trim().parse::<Rank>().ok())
            .ok_or_else(|| VocabError::Parse {
                line: line_no,
                message: format!(
                    "invalid rank '{}'",
                    String::from_utf8_lossy(&line[space_pos + 1..])
                ),
            })?;

        encoder.insert(token, rank);
    }

    Ok(encoder)
}

/// Reads and parses a tiktoken vocabulary file.
pub fn load_tiktoken_bpe_file(
    path: impl AsRef<Path>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| VocabError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_tiktoken_bpe(&data)
}
