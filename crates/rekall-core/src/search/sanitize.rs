//! Query sanitation (`spec.md` §4.4 step 1): normalize whitespace, escape
//! FTS5 metacharacters, truncate terms, cap the overall query length.

const MAX_TERM_LEN: usize = 100;
const MAX_QUERY_LEN: usize = 500;
const FTS_METACHARS: &[char] = &['"', '*', '(', ')'];

/// Sanitize a raw user query for use against `entries_fts` and the keyword
/// tokenizer. Idempotent: sanitizing an already-sanitized query is a no-op.
pub fn sanitize_query(raw: &str) -> String {
    let mut terms = Vec::new();
    for term in raw.split_whitespace() {
        let escaped: String = term.chars().filter(|c| !FTS_METACHARS.contains(c)).collect();
        if escaped.is_empty() {
            continue;
        }
        let truncated: String = escaped.chars().take(MAX_TERM_LEN).collect();
        terms.push(truncated);
    }
    let joined = terms.join(" ");
    joined.chars().take(MAX_QUERY_LEN).collect()
}
