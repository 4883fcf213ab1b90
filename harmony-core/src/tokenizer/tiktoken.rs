//! tiktoken-compatible BPE model with a special-token table.

use std::collections::HashSet;
use std::fmt;

use aho_corasick::{AhoCorasick, MatchKind};
use fancy_regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use super::bpe::byte_pair_encode;
use super::vocab::VocabError;

/// Token identifier. Ordinary tokens and special tokens share one id space.
pub type Rank = u32;

/// Errors raised when turning tokens back into bytes or text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid token for decoding: {token}")]
    InvalidToken { token: Rank },

    #[error("invalid utf-8 in decoded tokens at byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Byte-pair encoder over an ordinary vocabulary plus special tokens.
#[derive(Clone)]
pub struct CoreBpe {
    encoder: FxHashMap<Vec<u8>, Rank>,
    decoder: FxHashMap<Rank, Vec<u8>>,
    special_tokens_encoder: FxHashMap<String, Rank>,
    special_tokens_decoder: FxHashMap<Rank, String>,
    /// Special token surfaces in lexicographic order.
    sorted_special_tokens: Vec<String>,
    pattern: Regex,
    /// Leftmost-longest matcher used to split text on allowed special tokens.
    special_splitter: Option<AhoCorasick>,
    /// Overlapping matcher used to locate special token text; pattern ids
    /// follow `sorted_special_tokens`.
    special_scanner: Option<AhoCorasick>,
}

impl CoreBpe {
    /// Builds a tokenizer from ordinary ranks, special tokens and the
    /// pre-tokenization pattern.
    ///
    /// Every single byte must have a rank, and no rank may be shared between
    /// an ordinary and a special token.
    pub fn new(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens_encoder: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, VocabError> {
        if let Some(byte) = (0..=u8::MAX).find(|b| !encoder.contains_key([*b].as_slice())) {
            return Err(VocabError::MissingByte(byte));
        }

        let decoder: FxHashMap<Rank, Vec<u8>> =
            encoder.iter().map(|(k, v)| (*v, k.clone())).collect();

        let mut special_tokens_decoder = FxHashMap::default();
        for (surface, &rank) in &special_tokens_encoder {
            if decoder.contains_key(&rank) {
                return Err(VocabError::DuplicateRank { rank });
            }
            special_tokens_decoder.insert(rank, surface.clone());
        }

        let pattern = Regex::new(pattern).map_err(|e| VocabError::Pattern(e.to_string()))?;

        let mut sorted_special_tokens: Vec<String> =
            special_tokens_encoder.keys().cloned().collect();
        sorted_special_tokens.sort_unstable();

        let (special_splitter, special_scanner) = if sorted_special_tokens.is_empty() {
            (None, None)
        } else {
            let splitter = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .build(&sorted_special_tokens)?;
            let scanner = AhoCorasick::builder()
                .match_kind(MatchKind::Standard)
                .build(&sorted_special_tokens)?;
            (Some(splitter), Some(scanner))
        };

        Ok(Self {
            encoder,
            decoder,
            special_tokens_encoder,
            special_tokens_decoder,
            sorted_special_tokens,
            pattern,
            special_splitter,
            special_scanner,
        })
    }

    /// Encodes text without recognizing any special tokens.
    pub fn encode_ordinary(&self, text: &str) -> Vec<Rank> {
        let mut tokens = Vec::new();
        self.encode_ordinary_into(text, &mut tokens);
        tokens
    }

    fn encode_ordinary_into(&self, text: &str, tokens: &mut Vec<Rank>) {
        let mut last_end = 0;
        for found in self.pattern.find_iter(text) {
            let piece = match found {
                Ok(piece) => piece,
                Err(err) => {
                    warn!(error = %err, "pre-tokenization failed, encoding remainder as one piece");
                    break;
                }
            };
            if piece.start() > last_end {
                self.encode_piece(&text.as_bytes()[last_end..piece.start()], tokens);
            }
            self.encode_piece(piece.as_str().as_bytes(), tokens);
            last_end = piece.end();
        }
        if last_end < text.len() {
            self.encode_piece(&text.as_bytes()[last_end..], tokens);
        }
    }

    fn encode_piece(&self, piece: &[u8], tokens: &mut Vec<Rank>) {
        match self.encoder.get(piece) {
            Some(&rank) => tokens.push(rank),
            None => tokens.extend(byte_pair_encode(piece, &self.encoder)),
        }
    }

    /// Encodes text, emitting special token ids only for surfaces in
    /// `allowed_special`. Other special token text is encoded as ordinary text.
    pub fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Vec<Rank> {
        let Some(splitter) = self.special_splitter.as_ref() else {
            return self.encode_ordinary(text);
        };
        if allowed_special.is_empty() {
            return self.encode_ordinary(text);
        }

        let mut tokens = Vec::new();
        let mut start = 0;
        for found in splitter.find_iter(text) {
            let surface = &text[found.start()..found.end()];
            if !allowed_special.contains(surface) {
                continue;
            }
            if let Some(&rank) = self.special_tokens_encoder.get(surface) {
                self.encode_ordinary_into(&text[start..found.start()], &mut tokens);
                tokens.push(rank);
                start = found.end();
            }
        }
        self.encode_ordinary_into(&text[start..], &mut tokens);
        tokens
    }

    /// Encodes text treating every special token surface as its special id.
    pub fn encode_with_special_tokens(&self, text: &str) -> Vec<Rank> {
        let allowed: HashSet<&str> = self.sorted_special_tokens.iter().map(String::as_str).collect();
        self.encode(text, &allowed)
    }

    /// Finds the special token text in `text` with the lowest byte offset
    /// among those accepted by `candidate`.
    ///
    /// Matches starting at the same offset are resolved in lexicographic order
    /// of their surfaces.
    pub fn find_special_token<F>(&self, text: &str, candidate: F) -> Option<(&str, usize)>
    where
        F: Fn(&str) -> bool,
    {
        let scanner = self.special_scanner.as_ref()?;
        let mut best: Option<(usize, usize)> = None;
        for found in scanner.find_overlapping_iter(text) {
            let key = (found.start(), found.pattern().as_usize());
            if best.is_some_and(|b| b <= key) {
                continue;
            }
            if candidate(&self.sorted_special_tokens[key.1]) {
                best = Some(key);
            }
        }
        best.map(|(offset, idx)| (self.sorted_special_tokens[idx].as_str(), offset))
    }

    /// Returns the bytes a single token stands for.
    pub fn token_bytes(&self, token: Rank) -> Result<&[u8], DecodeError> {
        if let Some(bytes) = self.decoder.get(&token) {
            return Ok(bytes);
        }
        self.special_tokens_decoder
            .get(&token)
            .map(|s| s.as_bytes())
            .ok_or(DecodeError::InvalidToken { token })
    }

    /// Concatenates the bytes of `tokens`.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(tokens.len() * 2);
        for &token in tokens {
            out.extend_from_slice(self.token_bytes(token)?);
        }
        Ok(out)
    }

    /// Decodes `tokens` to a string, failing if the bytes are not valid UTF-8.
    pub fn decode_utf8(&self, tokens: &[Rank]) -> Result<String, DecodeError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.utf8_error().valid_up_to(),
        })
    }

    /// All special token surfaces, sorted lexicographically.
    pub fn special_tokens(&self) -> &[String] {
        &self.sorted_special_tokens
    }

    pub fn special_token_id(&self, surface: &str) -> Option<Rank> {
        self.special_tokens_encoder.get(surface).copied()
    }

    pub fn is_special_token(&self, token: Rank) -> bool {
        self.special_tokens_decoder.contains_key(&token)
    }

    /// One past the highest token id.
    pub fn n_vocab(&self) -> usize {
        let ordinary = self.decoder.keys().max();
        let special = self.special_tokens_decoder.keys().max();
        ordinary.max(special).map_or(0, |max| *max as usize + 1)
    }
}

impl fmt::Debug for CoreBpe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBpe")
            .field("ordinary_tokens", &self.encoder.len())
            .field("special_tokens", &self.special_tokens_encoder.len())
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}
