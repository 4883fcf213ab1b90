//! Byte-pair tokenizer used underneath the Harmony encoding.
//!
//! The tokenizer is a tiktoken-compatible BPE model: ordinary text is split
//! with a pre-tokenization regex and each piece is merged by rank, while
//! special tokens live in a separate table and are only produced when the
//! caller allows them.

mod bpe;
mod tiktoken;
mod utf8;
mod vocab;

pub use tiktoken::{CoreBpe, DecodeError, Rank};
pub use utf8::{decode_lossy_per_byte, Utf8Accumulator};
pub use vocab::{load_tiktoken_bpe, load_tiktoken_bpe_file, VocabError};
