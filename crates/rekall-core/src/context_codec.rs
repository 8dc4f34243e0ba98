//! Context Codec (C2): compress/decompress `StructuredContext`, extract
//! searchable keywords. See `spec.md` §4.2.
//!
//! Encoding is canonical JSON (`serde_json`, which serializes struct fields
//! in declaration order — canonical for a fixed type) followed by DEFLATE
//! (`flate2`). Typical compressed size is 15–30% of the raw JSON for
//! natural-language context.
//!
//! Keyword tokenizer (Open Question in `spec.md` §9, resolved here and
//! recorded in `DESIGN.md`): split on any character that is not an ASCII
//! letter or digit, lowercase, drop tokens shorter than 3 characters and
//! tokens in [`STOPWORDS`], dedupe preserving first occurrence, keep at most
//! [`MAX_KEYWORDS`].

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::entry::StructuredContext;

pub const MAX_KEYWORDS: usize = 64;
const MIN_TOKEN_LEN: usize = 3;

/// Small, stable stopword list. Deliberately fixed in the source (not
/// locale- or corpus-derived) so keyword recall of stored entries is stable
/// across versions, per the Open Question in `spec.md` §9.
pub const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now",
    "old", "see", "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she",
    "too", "use", "that", "this", "with", "have", "from", "they", "will", "would", "there",
    "their", "what", "about", "which", "when", "make", "like", "time", "just", "into",
    "over", "than", "then", "them", "these", "some", "been", "were", "also",
];

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to compress context: {0}")]
    Compress(#[from] std::io::Error),
    #[error("failed to decompress or parse context: {0}")]
    Corrupt(String),
}

/// Compress a [`StructuredContext`] and extract its keyword set.
pub fn encode(ctx: &StructuredContext) -> Result<(Vec<u8>, Vec<String>), ContextError> {
    let json = serde_json::to_vec(ctx).map_err(|e| ContextError::Corrupt(e.to_string()))?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let blob = encoder.finish()?;
    Ok((blob, extract_keywords(ctx)))
}

/// Decompress and parse a context blob. Fails with [`ContextError::Corrupt`]
/// if decompression or JSON validation fails; callers should treat the
/// entry as usable with empty context on failure, per `spec.md` §4.2/§7.
pub fn decode(blob: &[u8]) -> Result<StructuredContext, ContextError> {
    let mut decoder = DeflateDecoder::new(blob);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| ContextError::Corrupt(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| ContextError::Corrupt(e.to_string()))
}

/// Extract the normalized keyword set for a context: union of explicit
/// `trigger_keywords` with tokens extracted from situation + solution.
pub fn extract_keywords(ctx: &StructuredContext) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for kw in &ctx.trigger_keywords {
        push_normalized(kw, &mut seen, &mut out);
    }

    let free_text = format!(
        "{} {}",
        ctx.situation.as_deref().unwrap_or(""),
        ctx.solution.as_deref().unwrap_or("")
    );
    for token in tokenize(&free_text) {
        push_normalized(&token, &mut seen, &mut out);
        if out.len() >= MAX_KEYWORDS {
            break;
        }
    }

    out.truncate(MAX_KEYWORDS);
    out
}

/// Tokenize arbitrary text with the same normalization keyword extraction
/// uses: lowercase, split on non-alphanumerics, drop short tokens and
/// stopwords. Used by the search engine (§4.4 step 2) so query tokens and
/// stored keywords are comparable.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter_map(|raw| {
            let lower = raw.to_lowercase();
            if lower.len() < MIN_TOKEN_LEN || STOPWORDS.contains(&lower.as_str()) {
                None
            } else {
                Some(lower)
            }
        })
        .collect()
}

fn push_normalized(raw: &str, seen: &mut std::collections::HashSet<String>, out: &mut Vec<String>) {
    let lower = raw.trim().to_lowercase();
    if lower.len() < MIN_TOKEN_LEN || STOPWORDS.contains(&lower.as_str()) {
        return;
    }
    if seen.insert(lower.clone()) {
        out.push(lower);
    }
}
