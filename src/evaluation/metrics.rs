/// Ranking metrics over a ranked list of document ids and graded judgments.
///
/// A document is relevant when its judgment is above zero. Unjudged
/// documents count as non-relevant.

use std::collections::HashMap;

fn relevance(judgments: &HashMap<String, u32>, doc: &str) -> u32 {
    judgments.get(doc).copied().unwrap_or(0)
}

/// nDCG@k with linear gains and a log2(rank + 1) discount.
pub fn ndcg_at_k<S: AsRef<str>>(ranked: &[S], judgments: &HashMap<String, u32>, k: usize) -> f64 {
    let discount = |i: usize| ((i + 2) as f64).log2();

    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, doc)| relevance(judgments, doc.as_ref()) as f64 / discount(i))
        .sum();

    let mut ideal: Vec<u32> = judgments.values().copied().filter(|&r| r > 0).collect();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, &rel)| rel as f64 / discount(i))
        .sum();

    if idcg > 0.0 { dcg / idcg } else { 0.0 }
}

/// Share of relevant documents found in the top k.
pub fn recall_at_k<S: AsRef<str>>(ranked: &[S], judgments: &HashMap<String, u32>, k: usize) -> f64 {
    let relevant = judgments.values().filter(|&&r| r > 0).count();
    if relevant == 0 {
        return 0.0;
    }
    let found = ranked
        .iter()
        .take(k)
        .filter(|doc| relevance(judgments, doc.as_ref()) > 0)
        .count();
    found as f64 / relevant as f64
}

/// 1.0 when any of the top k is relevant.
pub fn hits_at_k<S: AsRef<str>>(ranked: &[S], judgments: &HashMap<String, u32>, k: usize) -> f64 {
    let hit = ranked
        .iter()
        .take(k)
        .any(|doc| relevance(judgments, doc.as_ref()) > 0);
    if hit { 1.0 } else { 0.0 }
}

/// 1 / rank of the first relevant document; averaged over queries this is MRR.
pub fn reciprocal_rank<S: AsRef<str>>(ranked: &[S], judgments: &HashMap<String, u32>) -> f64 {
    ranked
        .iter()
        .position(|doc| relevance(judgments, doc.as_ref()) > 0)
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgments(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(d, r)| (d.to_string(), *r)).collect()
    }

    #[test]
    fn test_perfect_ranking_has_ndcg_one() {
        let j = judgments(&[("a", 2), ("b", 1)]);
        assert!((ndcg_at_k(&["a", "b", "c"], &j, 10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ndcg_penalizes_late_hits() {
        let j = judgments(&[("a", 1)]);
        let ndcg = ndcg_at_k(&["x", "a"], &j, 10);
        assert!((ndcg - 1.0 / 3f64.log2()).abs() < 1e-12);
        assert_eq!(ndcg_at_k(&["x", "a"], &j, 1), 0.0);
    }

    #[test]
    fn test_ndcg_without_relevant_documents_is_zero() {
        let j = judgments(&[("a", 0)]);
        assert_eq!(ndcg_at_k(&["a"], &j, 10), 0.0);
    }

    #[test]
    fn test_recall_and_hits() {
        let j = judgments(&[("a", 1), ("b", 1), ("z", 0)]);
        let ranked = ["a", "z", "c", "b"];
        assert_eq!(recall_at_k(&ranked, &j, 3), 0.5);
        assert_eq!(recall_at_k(&ranked, &j, 10), 1.0);
        assert_eq!(hits_at_k(&ranked, &j, 1), 1.0);
        assert_eq!(hits_at_k(&["z", "a"], &j, 1), 0.0);
    }

    #[test]
    fn test_reciprocal_rank() {
        let j = judgments(&[("b", 1)]);
        assert_eq!(reciprocal_rank(&["a", "c", "b"], &j), 1.0 / 3.0);
        assert_eq!(reciprocal_rank(&["a"], &j), 0.0);
        let empty: [&str; 0] = [];
        assert_eq!(reciprocal_rank(&empty, &j), 0.0);
    }
}
