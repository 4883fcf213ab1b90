//! Incremental UTF-8 decoding for token streams.
//!
//! A single token may end in the middle of a multi-byte character, so token
//! bytes cannot be decoded one token at a time. [`Utf8Accumulator`] holds an
//! incomplete trailing sequence until later bytes complete it, and replaces
//! bytes that can never form a character with U+FFFD, one per byte.

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Buffers bytes until they form complete UTF-8 characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns all text that is now decidable.
    ///
    /// A trailing incomplete sequence stays buffered and is not part of the
    /// returned string.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let consumed = decode_into(&self.pending, &mut out, false);
        self.pending.drain(..consumed);
        out
    }

    /// Releases whatever is still buffered, one U+FFFD per byte.
    pub fn flush(&mut self) -> String {
        let mut out = String::new();
        decode_into(&self.pending, &mut out, true);
        self.pending.clear();
        out
    }

    /// Returns `true` when an incomplete sequence is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_bytes(&self) -> &[u8] {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Decodes a complete byte sequence with the same replacement rules as
/// [`Utf8Accumulator`].
///
/// Unlike [`String::from_utf8_lossy`], every unresolvable byte becomes its own
/// U+FFFD, so the output matches a byte-at-a-time decode of the same input.
pub fn decode_lossy_per_byte(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    decode_into(bytes, &mut out, true);
    out
}

/// Decodes `bytes` into `out` and returns how many bytes were consumed.
///
/// When `at_end` is false an incomplete trailing sequence is left unconsumed.
fn decode_into(bytes: &[u8], out: &mut String, at_end: bool) -> usize {
    let mut offset = 0;
    loop {
        let rest = &bytes[offset..];
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return bytes.len();
            }
            Err(err) => {
                let valid = err.valid_up_to();
                if let Ok(prefix) = std::str::from_utf8(&rest[..valid]) {
                    out.push_str(prefix);
                }
                match err.error_len() {
                    Some(invalid) => {
                        out.extend(std::iter::repeat_n(REPLACEMENT, invalid));
                        offset += valid + invalid;
                    }
                    None if at_end => {
                        out.extend(std::iter::repeat_n(REPLACEMENT, rest.len() - valid));
                        return bytes.len();
                    }
                    None => return offset + valid,
                }
            }
        }
    }
}
