//! Shared helpers for integration tests.
//!
//! The in-memory vocabulary has every single byte at its own value, a few
//! merges and some whole words. Special tokens use the real `o200k_harmony`
//! ids, so fixtures written for the real vocabulary parse with it too.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::LazyLock;

use harmony_core::{load_harmony_encoding, HarmonyEncoding, HarmonyEncodingName, Rank};

pub const RETURN: Rank = 200_002;
pub const CONSTRAIN: Rank = 200_003;
pub const CHANNEL: Rank = 200_005;
pub const START: Rank = 200_006;
pub const END: Rank = 200_007;
pub const MESSAGE: Rank = 200_008;
pub const CALL: Rank = 200_012;

const MERGES: [&str; 9] = ["he", "ll", "hell", "hello", " w", "or", "ld", " wor", " world"];

const WORDS: [&str; 10] = [
    "assistant",
    "user",
    "system",
    "developer",
    "analysis",
    "commentary",
    "final",
    " to",
    "functions",
    " Tokyo",
];

/// Rank of `"hello"` in the test vocabulary.
pub const HELLO: Rank = 259;
/// Rank of `" world"` in the test vocabulary.
pub const WORLD: Rank = 264;

static ENCODING: LazyLock<HarmonyEncoding> = LazyLock::new(|| {
    HarmonyEncoding::from_ranks(HarmonyEncodingName::HarmonyGptOss, test_ranks())
        .expect("test vocabulary is valid")
});

pub fn test_ranks() -> Vec<(Vec<u8>, Rank)> {
    let mut ranks: Vec<(Vec<u8>, Rank)> = (0u8..=255).map(|b| (vec![b], Rank::from(b))).collect();
    let extra = MERGES.iter().chain(WORDS.iter());
    for (offset, piece) in extra.enumerate() {
        ranks.push((piece.as_bytes().to_vec(), 256 + offset as Rank));
    }
    ranks
}

/// The shared in-memory encoding.
pub fn encoding() -> HarmonyEncoding {
    ENCODING.clone()
}

/// The real `o200k_harmony` encoding, when `TIKTOKEN_ENCODINGS_BASE` is set.
pub fn real_encoding() -> Option<HarmonyEncoding> {
    std::env::var_os("TIKTOKEN_ENCODINGS_BASE")?;
    Some(load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss).expect("vocabulary loads"))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// A text fixture without its trailing newline.
pub fn fixture_text(name: &str) -> String {
    let text = std::fs::read_to_string(fixture_path(name)).expect("fixture exists");
    text.trim_end_matches('\n').to_string()
}

/// A fixture of whitespace-separated token ids.
pub fn fixture_tokens(name: &str) -> Vec<Rank> {
    std::fs::read_to_string(fixture_path(name))
        .expect("fixture exists")
        .split_whitespace()
        .map(|t| t.parse().expect("token ids are decimal"))
        .collect()
}

/// Encodes text with every special token surface allowed.
pub fn tokens_of(text: &str) -> Vec<Rank> {
    ENCODING.tokenizer().encode_with_special_tokens(text)
}
