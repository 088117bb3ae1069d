//! Text shaping shared by ingestion, filtering, reranking and query input.
//!
//! The same paper fields are joined in three slightly different ways, and the
//! differences matter:
//!
//! - [`document_text`]: `title \n abstract` with spaces around the newline.
//!   This is what gets embedded, so it must never change for an existing index.
//! - [`keyword_haystack`]: the same join, lowercased, for substring filters.
//! - [`rerank_passage`]: `title\nabstract`, the passage handed to the cross-encoder.
//!
//! Text extracted from uploaded documents goes through [`query_from_extracted_text`]
//! before it reaches the query engine: Unicode NFC, whitespace collapsed, capped
//! at [`MAX_QUERY_CHARS`].

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Maximum characters of extracted document text used as a query.
pub const MAX_QUERY_CHARS: usize = 1000;

const FIELD_SEPARATOR: &str = " \n ";

/// Join title and abstract into the text that gets embedded.
pub fn document_text(title: &str, abstract_text: &str) -> String {
    format!("{title}{FIELD_SEPARATOR}{abstract_text}")
}

/// Lowercased title + abstract used by the keyword filter.
pub fn keyword_haystack(title: &str, abstract_text: &str) -> String {
    document_text(title, abstract_text).to_lowercase()
}

/// Passage scored by the cross-encoder for a candidate paper.
pub fn rerank_passage(title: &str, abstract_text: &str) -> String {
    format!("{title}\n{abstract_text}")
}

/// Turn raw extracted document text into a query string.
pub fn query_from_extracted_text(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    truncate_to_chars(&normalize_whitespace(&normalized), MAX_QUERY_CHARS)
}

/// Collapse whitespace runs into single spaces and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_whitespace = true;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_whitespace {
                result.push(' ');
                prev_whitespace = true;
            }
        } else {
            result.push(c);
            prev_whitespace = false;
        }
    }

    if result.ends_with(' ') {
        result.pop();
    }
    result
}

/// Truncate to at most `max_chars` characters, never splitting a code point.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// SHA256 over a sequence of `(id, text)` pairs, hex encoded.
///
/// Identifies the exact corpus an artifact set was built from.
pub fn corpus_fingerprint<'a, I>(docs: I) -> String
where
    I: IntoIterator<Item = (u64, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (id, text) in docs {
        hasher.update(id.to_le_bytes());
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hex::encode(hasher.finalize())
}
