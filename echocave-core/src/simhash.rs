//! 64-bit Simhash fingerprint over the distinct codepoints of a text.
//!
//! Tokenization is character-granular: fine for CJK, where single
//! characters carry meaning, coarse for space-separated languages.
//! Case and whitespace are normalized away so trivial edits cannot
//! dodge the fingerprint.

use md5::{Digest, Md5};
use std::collections::HashSet;

/// Compute the Simhash of a text as 16 lowercase hex characters.
///
/// Lowercases, strips all Unicode whitespace, and folds each distinct
/// codepoint's MD5 into a 64-lane signed accumulator. Lane 0 maps to
/// the most significant bit of the output. Returns an empty string when
/// nothing survives cleaning.
pub fn simhash(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut accumulator = [0i32; 64];
    let mut tokens = 0usize;

    for ch in text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
    {
        if !seen.insert(ch) {
            continue;
        }
        tokens += 1;
        let mut buf = [0u8; 4];
        let digest = Md5::digest(ch.encode_utf8(&mut buf).as_bytes());
        for (i, lane) in accumulator.iter_mut().enumerate() {
            // little-endian bit order over the first 8 digest bytes
            let bit = (digest[i / 8] >> (i % 8)) & 1;
            *lane += if bit == 1 { 1 } else { -1 };
        }
    }

    if tokens == 0 {
        return String::new();
    }

    let mut bits: u64 = 0;
    for lane in accumulator {
        bits = (bits << 1) | u64::from(lane > 0);
    }
    format!("{bits:016x}")
}
