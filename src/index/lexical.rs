/// Inverted index with classic BM25 scoring
///
/// One posting list per term, sorted by document ordinal. Ordinals follow
/// ascending document id (see `IndexSnapshot::build`), so ordering ties by
/// ordinal is the same as ordering them by document id.

use std::collections::HashMap;

use crate::config::Bm25Config;
use crate::corpus::Document;
use crate::text::normalize_tokens;

/// Position of a document inside one index snapshot.
pub type DocOrdinal = u32;

/// Tunable BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params { k1: 1.2, b: 0.75 }
    }
}

impl From<&Bm25Config> for Bm25Params {
    fn from(config: &Bm25Config) -> Self {
        Bm25Params { k1: config.k1, b: config.b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc: DocOrdinal,
    pub term_frequency: u32,
    /// Token offsets of the term inside the document
    pub positions: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    average_document_length: f64,
}

/// Inverse document frequency: ln(1 + (N - df + 0.5) / (df + 0.5)).
pub fn idf(document_count: usize, document_frequency: usize) -> f64 {
    let n = document_count as f64;
    let df = document_frequency as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

impl LexicalIndex {
    /// Build postings for `documents`; a document's ordinal is its slice index.
    pub fn build(documents: &[Document]) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut total_length: u64 = 0;

        for (ordinal, doc) in documents.iter().enumerate() {
            let tokens = normalize_tokens(&doc.text);
            doc_lengths.push(tokens.len() as u32);
            total_length += tokens.len() as u64;

            let mut positions: HashMap<String, Vec<u32>> = HashMap::new();
            for (pos, token) in tokens.into_iter().enumerate() {
                positions.entry(token).or_default().push(pos as u32);
            }
            for (term, positions) in positions {
                postings.entry(term).or_default().push(Posting {
                    doc: ordinal as DocOrdinal,
                    term_frequency: positions.len() as u32,
                    positions,
                });
            }
        }

        let average_document_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total_length as f64 / doc_lengths.len() as f64
        };

        LexicalIndex { postings, doc_lengths, average_document_length }
    }

    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn average_document_length(&self) -> f64 {
        self.average_document_length
    }

    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    /// Number of documents containing `term` (== its posting list length).
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    pub fn postings(&self, term: &str) -> Option<&[Posting]> {
        self.postings.get(term).map(Vec::as_slice)
    }

    pub fn document_length(&self, doc: DocOrdinal) -> Option<u32> {
        self.doc_lengths.get(doc as usize).copied()
    }

    /// Score documents against normalized query terms and keep the top `k`.
    ///
    /// Repeated query terms count once. Documents matching no term get no
    /// entry. Output is score-descending with ties broken by ascending ordinal.
    pub fn score(&self, terms: &[String], params: Bm25Params, k: usize) -> Vec<(DocOrdinal, f64)> {
        if k == 0 || self.doc_lengths.is_empty() {
            return Vec::new();
        }

        let mut seen: Vec<&str> = Vec::with_capacity(terms.len());
        for term in terms {
            if !seen.contains(&term.as_str()) {
                seen.push(term);
            }
        }

        let n = self.document_count();
        let avgdl = if self.average_document_length > 0.0 { self.average_document_length } else { 1.0 };
        let mut scores: HashMap<DocOrdinal, f64> = HashMap::new();

        for term in seen {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let term_idf = idf(n, list.len());
            for posting in list {
                let tf = posting.term_frequency as f64;
                let dl = self.doc_lengths[posting.doc as usize] as f64;
                let norm = params.k1 * (1.0 - params.b + params.b * dl / avgdl);
                *scores.entry(posting.doc).or_insert(0.0) += term_idf * (tf * (params.k1 + 1.0)) / (tf + norm);
            }
        }

        let mut ranked: Vec<(DocOrdinal, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Verify the structural invariants: postings reference existing
    /// documents, are strictly ordered, and carry consistent frequencies.
    pub fn check_invariants(&self) -> Result<(), String> {
        let n = self.doc_lengths.len();
        for (term, list) in &self.postings {
            if list.is_empty() {
                return Err(format!("term '{}' has an empty posting list", term));
            }
            for window in list.windows(2) {
                if window[0].doc >= window[1].doc {
                    return Err(format!("posting list for '{}' is not sorted by document", term));
                }
            }
            for posting in list {
                if posting.doc as usize >= n {
                    return Err(format!("posting for '{}' references unknown document {}", term, posting.doc));
                }
                if posting.term_frequency as usize != posting.positions.len() {
                    return Err(format!("posting for '{}' has tf != positions", term));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::RawDocument;

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Document::from_raw(RawDocument {
                    id: format!("d{}", i),
                    title: String::new(),
                    text: t.to_string(),
                    embedding: vec![],
                })
            })
            .collect()
    }

    fn terms(q: &str) -> Vec<String> {
        normalize_tokens(q)
    }

    #[test]
    fn test_global_statistics() {
        let index = LexicalIndex::build(&docs(&["tony stark iron man", "steve rogers captain america", "tony stark avenger"]));
        assert_eq!(index.document_count(), 3);
        assert!((index.average_document_length() - 11.0 / 3.0).abs() < 1e-12);
        assert_eq!(index.document_frequency("tony"), 2);
        assert_eq!(index.document_frequency("rogers"), 1);
        assert_eq!(index.document_frequency("thor"), 0);
        assert_eq!(index.postings("tony").unwrap().len(), index.document_frequency("tony"));
        assert!(index.check_invariants().is_ok());
    }

    #[test]
    fn test_positions_recorded() {
        let index = LexicalIndex::build(&docs(&["stark tony stark"]));
        let posting = &index.postings("stark").unwrap()[0];
        assert_eq!(posting.term_frequency, 2);
        assert_eq!(posting.positions, vec![0, 2]);
    }

    #[test]
    fn test_idf_formula() {
        // N=3, df=2 → ln(1 + 1.5/2.5)
        assert!((idf(3, 2) - (1.0f64 + 0.6).ln()).abs() < 1e-12);
        assert!(idf(3, 1) > idf(3, 2));
    }

    #[test]
    fn test_single_term_score_matches_formula() {
        let index = LexicalIndex::build(&docs(&["tony stark iron man", "steve rogers captain america", "tony stark avenger"]));
        let params = Bm25Params::default();
        let ranked = index.score(&terms("rogers"), params, 10);
        assert_eq!(ranked.len(), 1);
        let avgdl = 11.0 / 3.0;
        let expected = idf(3, 1) * (1.0 * 2.2) / (1.0 + 1.2 * (1.0 - 0.75 + 0.75 * 4.0 / avgdl));
        assert!((ranked[0].1 - expected).abs() < 1e-12);
    }

    #[test]
    fn test_tony_stark_scenario() {
        let index = LexicalIndex::build(&docs(&["tony stark iron man", "steve rogers captain america", "tony stark avenger"]));
        let ranked = index.score(&terms("tony stark"), Bm25Params::default(), 10);
        // B matches nothing and gets no entry; C is shorter than A so it wins.
        assert_eq!(ranked.iter().map(|r| r.0).collect::<Vec<_>>(), vec![2, 0]);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn test_ties_break_by_ordinal() {
        let index = LexicalIndex::build(&docs(&["alpha beta", "gamma delta", "alpha beta"]));
        let ranked = index.score(&terms("alpha"), Bm25Params::default(), 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1, ranked[1].1);
        assert_eq!(ranked[0].0, 0);
        assert_eq!(ranked[1].0, 2);
    }

    #[test]
    fn test_unknown_terms_and_zero_k() {
        let index = LexicalIndex::build(&docs(&["alpha beta"]));
        assert!(index.score(&terms("zeta"), Bm25Params::default(), 10).is_empty());
        assert!(index.score(&[], Bm25Params::default(), 10).is_empty());
        assert!(index.score(&terms("alpha"), Bm25Params::default(), 0).is_empty());
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let index = LexicalIndex::build(&docs(&["alpha beta", "beta gamma"]));
        let once = index.score(&terms("alpha"), Bm25Params::default(), 10);
        let twice = index.score(&terms("alpha alpha"), Bm25Params::default(), 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_truncates_to_k() {
        let index = LexicalIndex::build(&docs(&["x a", "x b", "x c", "x d"]));
        let ranked = index.score(&terms("x"), Bm25Params::default(), 2);
        assert_eq!(ranked.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_unique_term_set_ranks_first_for_typical_params() {
        let index = LexicalIndex::build(&docs(&[
            "solar panel efficiency report",
            "wind turbine maintenance guide",
            "solar eclipse viewing tips",
            "panel discussion on efficiency",
        ]));
        for (k1, b) in [(0.9, 0.4), (1.2, 0.75), (2.0, 1.0), (1.5, 0.0)] {
            let ranked = index.score(&terms("wind turbine maintenance guide"), Bm25Params { k1, b }, 10);
            assert_eq!(ranked[0].0, 1, "k1={} b={}", k1, b);
        }
    }
}
