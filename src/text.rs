/// Characters that separate tokens instead of being stripped.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '/' | '_' | '\u{2013}' | '\u{2014}')
}

/// Lowercase, split on whitespace and separator punctuation, strip remaining
/// punctuation, drop empty tokens.
///
/// Shared by indexing, BM25 querying, and feature extraction. Documents and
/// queries must go through this same function, otherwise query terms silently
/// miss the vocabulary.
///
/// ```
/// use mosaic::text::normalize_tokens;
///
/// assert_eq!(normalize_tokens("Who played Tony Stark?"), ["who", "played", "tony", "stark"]);
/// ```
pub fn normalize_tokens(text: &str) -> Vec<String> {
    text.split(is_separator)
        .map(|raw| {
            raw.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .collect()
}
