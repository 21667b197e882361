/// Reciprocal Rank Fusion
///
/// fused_score(d) = Σ_r w_r / (k + rank_r(d)) over every list r containing d.
/// Plain RRF uses w_r = 1. Ranks are used, not scores, so lists from
/// heterogeneous retrievers need no calibration.
///
/// Inputs and accumulators are ordered maps, so fusion is a pure function of
/// its inputs: identical lists always give identical scores in identical order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::retrieval::Candidate;

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One document after fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub document_id: String,
    pub fused_score: f64,
    /// retriever name → 1-based rank in that retriever's list
    pub contributing_ranks: BTreeMap<String, usize>,
}

/// Unweighted RRF over named candidate lists.
pub fn reciprocal_rank_fusion(lists: &BTreeMap<String, Vec<Candidate>>, k_param: f64) -> Vec<FusedResult> {
    fuse(lists, k_param, |_| 1.0)
}

/// Weighted RRF. Lists without an entry in `weights` get weight 0 and only
/// contribute their ranks to `contributing_ranks`.
pub fn weighted_reciprocal_rank_fusion(
    lists: &BTreeMap<String, Vec<Candidate>>,
    weights: &BTreeMap<String, f64>,
    k_param: f64,
) -> Vec<FusedResult> {
    fuse(lists, k_param, |name| weights.get(name).copied().unwrap_or(0.0))
}

fn fuse<W>(lists: &BTreeMap<String, Vec<Candidate>>, k_param: f64, weight: W) -> Vec<FusedResult>
where
    W: Fn(&str) -> f64,
{
    let mut fused: BTreeMap<&str, FusedResult> = BTreeMap::new();

    for (name, candidates) in lists {
        let w = weight(name);
        for candidate in candidates {
            let entry = fused.entry(candidate.document_id.as_str()).or_insert_with(|| FusedResult {
                document_id: candidate.document_id.clone(),
                fused_score: 0.0,
                contributing_ranks: BTreeMap::new(),
            });
            // A document counts once per list, at its first (best) rank.
            if entry.contributing_ranks.contains_key(name) {
                continue;
            }
            entry.contributing_ranks.insert(name.clone(), candidate.rank);
            entry.fused_score += w / (k_param + candidate.rank as f64);
        }
    }

    let mut results: Vec<FusedResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<Candidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Candidate {
                document_id: id.to_string(),
                score: 10.0 - i as f64,
                rank: i + 1,
            })
            .collect()
    }

    fn lists(bm25: &[&str], dense: &[&str]) -> BTreeMap<String, Vec<Candidate>> {
        let mut lists = BTreeMap::new();
        lists.insert("bm25".to_string(), list(bm25));
        lists.insert("dense".to_string(), list(dense));
        lists
    }

    #[test]
    fn test_single_list_score_is_exact() {
        let fused = reciprocal_rank_fusion(&lists(&["a", "b", "c"], &[]), 60.0);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[2].document_id, "c");
        assert_eq!(fused[2].fused_score, 1.0 / (60.0 + 3.0));
        assert_eq!(fused[2].contributing_ranks.get("bm25"), Some(&3));
        assert_eq!(fused[2].contributing_ranks.get("dense"), None);
    }

    #[test]
    fn test_documents_in_both_lists_rise() {
        let fused = reciprocal_rank_fusion(&lists(&["a", "b"], &["c", "b"]), 60.0);
        assert_eq!(fused[0].document_id, "b");
        assert_eq!(fused[0].fused_score, 1.0 / 62.0 + 1.0 / 62.0);
        assert_eq!(fused[0].contributing_ranks.len(), 2);
    }

    #[test]
    fn test_ties_break_by_document_id() {
        // "z" is first in bm25 and "a" first in dense: identical fused scores.
        let fused = reciprocal_rank_fusion(&lists(&["z"], &["a"]), 60.0);
        let ids: Vec<&str> = fused.iter().map(|f| f.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let input = lists(&["d", "a", "q", "m"], &["m", "x", "d", "b"]);
        let first = reciprocal_rank_fusion(&input, 60.0);
        for _ in 0..10 {
            assert_eq!(reciprocal_rank_fusion(&input, 60.0), first);
        }
    }

    #[test]
    fn test_k_param_is_honored() {
        let fused = reciprocal_rank_fusion(&lists(&["a"], &[]), 10.0);
        assert_eq!(fused[0].fused_score, 1.0 / 11.0);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        assert!(reciprocal_rank_fusion(&BTreeMap::new(), DEFAULT_RRF_K).is_empty());
        assert!(reciprocal_rank_fusion(&lists(&[], &[]), DEFAULT_RRF_K).is_empty());
    }

    #[test]
    fn test_weighted_fusion_scales_contributions() {
        let mut weights = BTreeMap::new();
        weights.insert("bm25".to_string(), 0.25);
        weights.insert("dense".to_string(), 0.75);
        let fused = weighted_reciprocal_rank_fusion(&lists(&["a"], &["b"]), &weights, 60.0);
        assert_eq!(fused[0].document_id, "b");
        assert_eq!(fused[0].fused_score, 0.75 / 61.0);
        assert_eq!(fused[1].fused_score, 0.25 / 61.0);
    }

    #[test]
    fn test_unweighted_list_still_reports_ranks() {
        let mut weights = BTreeMap::new();
        weights.insert("dense".to_string(), 1.0);
        let fused = weighted_reciprocal_rank_fusion(&lists(&["a"], &["a"]), &weights, 60.0);
        assert_eq!(fused[0].fused_score, 1.0 / 61.0);
        assert_eq!(fused[0].contributing_ranks.get("bm25"), Some(&1));
    }
}
