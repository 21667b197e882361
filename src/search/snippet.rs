/// Query-focused snippets for search hits
///
/// Scores each sentence by how many distinct query terms it contains and
/// returns the best sentence(s) up to `max_chars`, earliest first on ties.

use std::collections::HashSet;

use crate::text::normalize_tokens;

const ELLIPSIS: char = '…';

/// Extract the best-matching snippet of `text` for normalized `query_terms`.
///
/// Falls back to the leading sentence when no sentence overlaps the query.
pub fn extract_snippet(query_terms: &[String], text: &str, max_chars: usize) -> String {
    let sentences = split_sentences(text);
    if sentences.is_empty() || max_chars == 0 {
        return String::new();
    }

    let terms: HashSet<&str> = query_terms.iter().map(String::as_str).collect();
    let mut scored: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let tokens: HashSet<String> = normalize_tokens(sentence).into_iter().collect();
            let overlap = terms.iter().filter(|t| tokens.contains(**t)).count();
            (i, overlap)
        })
        .collect();

    if scored.iter().all(|&(_, overlap)| overlap == 0) {
        return truncate_to_chars(sentences[0], max_chars);
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut picked: Vec<usize> = Vec::new();
    let mut used = 0usize;
    for &(idx, overlap) in &scored {
        if overlap == 0 {
            break;
        }
        let len = sentences[idx].chars().count();
        if picked.is_empty() || used + len + 1 <= max_chars {
            used += len + usize::from(!picked.is_empty());
            picked.push(idx);
        } else {
            break;
        }
    }
    // Keep the chosen sentences in document order.
    picked.sort_unstable();
    let joined = picked.iter().map(|&i| sentences[i]).collect::<Vec<_>>().join(" ");
    truncate_to_chars(&joined, max_chars)
}

/// Split on `.`, `!`, `?` followed by whitespace, and on line breaks.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some(&(_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Truncate on a char boundary, appending an ellipsis when text was cut.
fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}
