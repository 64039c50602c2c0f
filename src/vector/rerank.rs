//! Rerankers for hybrid multi-vector fusion.

use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::vector::client::VectorHit;

pub trait Reranker: Send + Sync {
    /// `lists[j]` is the ordered hit list from sub-search `j`. Returns the
    /// fused list, already truncated to `top_k`.
    fn rerank(&self, lists: &[Vec<VectorHit>], top_k: usize) -> Result<Vec<VectorHit>>;
}

/// Reciprocal Rank Fusion: `score(h) = Σ_j 1/(K + rank_j(h) + 1)` over lists
/// containing `h`, 0-based rank, sorted descending. Ties preserve the
/// first-seen hit.
pub struct ReciprocalRankFusion {
    pub k: f64,
}

impl ReciprocalRankFusion {
    pub fn new(k: f64) -> Self {
        Self { k }
    }
}

impl Reranker for ReciprocalRankFusion {
    fn rerank(&self, lists: &[Vec<VectorHit>], top_k: usize) -> Result<Vec<VectorHit>> {
        if self.k < 1.0 {
            return Err(PipelineError::validation("RRF parameter K must be >= 1"));
        }
        fuse(lists, top_k, |_id, per_list_rank| {
            per_list_rank
                .iter()
                .filter_map(|rank| *rank)
                .map(|rank| 1.0 / (self.k + rank as f64 + 1.0))
                .sum()
        })
    }
}

/// Weighted fusion: `score(h) = Σ w_i · score_i(h)` over lists containing
/// `h`; absence from a list contributes 0. Requires `weights.len() == k`.
pub struct WeightedFusion {
    pub weights: Vec<f64>,
}

impl WeightedFusion {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }
}

impl Reranker for WeightedFusion {
    fn rerank(&self, lists: &[Vec<VectorHit>], top_k: usize) -> Result<Vec<VectorHit>> {
        if self.weights.len() != lists.len() {
            return Err(PipelineError::validation(format!(
                "weighted fusion requires {} weights, got {}",
                lists.len(),
                self.weights.len()
            )));
        }
        let weights = &self.weights;
        fuse_with_scores(lists, top_k, |scores_per_list| {
            scores_per_list
                .iter()
                .zip(weights.iter())
                .filter_map(|(score, w)| score.map(|s| s as f64 * w))
                .sum()
        })
    }
}

/// Shared fusion scaffold: walks every list once to learn first-seen order
/// and per-list rank, then scores each distinct hit with `score_fn` over its
/// per-list 0-based ranks (`None` where the hit is absent from that list).
fn fuse(
    lists: &[Vec<VectorHit>],
    top_k: usize,
    score_fn: impl Fn(i64, &[Option<usize>]) -> f64,
) -> Result<Vec<VectorHit>> {
    let k = lists.len();
    let mut first_seen: Vec<i64> = Vec::new();
    let mut by_id: HashMap<i64, VectorHit> = HashMap::new();
    let mut ranks: HashMap<i64, Vec<Option<usize>>> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        for (rank, hit) in list.iter().enumerate() {
            if !by_id.contains_key(&hit.id) {
                first_seen.push(hit.id);
                by_id.insert(hit.id, hit.clone());
                ranks.insert(hit.id, vec![None; k]);
            }
            ranks.get_mut(&hit.id).unwrap()[list_idx] = Some(rank);
        }
    }

    let mut scored: Vec<(i64, f64)> = first_seen
        .iter()
        .map(|id| (*id, score_fn(*id, &ranks[id])))
        .collect();

    stable_sort_desc(&mut scored);
    Ok(materialize(scored, &mut by_id, top_k))
}

/// Weighted fusion scores on raw per-list similarity scores rather than
/// ranks, so it walks the same first-seen bookkeeping but threads scores
/// instead of positions.
fn fuse_with_scores(
    lists: &[Vec<VectorHit>],
    top_k: usize,
    score_fn: impl Fn(&[Option<f32>]) -> f64,
) -> Result<Vec<VectorHit>> {
    let k = lists.len();
    let mut first_seen: Vec<i64> = Vec::new();
    let mut by_id: HashMap<i64, VectorHit> = HashMap::new();
    let mut per_list_scores: HashMap<i64, Vec<Option<f32>>> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        for hit in list.iter() {
            if !by_id.contains_key(&hit.id) {
                first_seen.push(hit.id);
                by_id.insert(hit.id, hit.clone());
                per_list_scores.insert(hit.id, vec![None; k]);
            }
            per_list_scores.get_mut(&hit.id).unwrap()[list_idx] = Some(hit.score);
        }
    }

    let mut scored: Vec<(i64, f64)> = first_seen
        .iter()
        .map(|id| (*id, score_fn(&per_list_scores[id])))
        .collect();

    stable_sort_desc(&mut scored);
    Ok(materialize(scored, &mut by_id, top_k))
}

/// Descending sort that preserves input order among ties (`sort_by` is a
/// stable sort, and `first_seen` already reflects first-seen order).
fn stable_sort_desc(scored: &mut [(i64, f64)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn materialize(
    scored: Vec<(i64, f64)>,
    by_id: &mut HashMap<i64, VectorHit>,
    top_k: usize,
) -> Vec<VectorHit> {
    scored
        .into_iter()
        .take(top_k)
        .map(|(id, score)| {
            let mut hit = by_id.remove(&id).expect("id came from by_id keys");
            hit.score = score as f32;
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, score: f32) -> VectorHit {
        VectorHit {
            id,
            score,
            fields: HashMap::new(),
        }
    }

    /// Lists `[1,2]` and `[2,3]`, RRF K=60: score(2) = 1/62 + 1/61 (appears
    /// in both), score(1) = 1/61, score(3) = 1/62, so a hit present in more
    /// lists outranks one present in only one even at a worse per-list rank.
    #[test]
    fn rrf_ranks_hit_present_in_more_lists_higher() {
        let list_a = vec![hit(1, 0.9), hit(2, 0.8)];
        let list_b = vec![hit(2, 0.95), hit(3, 0.7)];
        let fused = ReciprocalRankFusion::new(60.0)
            .rerank(&[list_a, list_b], 3)
            .unwrap();

        let ids: Vec<i64> = fused.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let score_of = |id: i64| fused.iter().find(|h| h.id == id).unwrap().score as f64;
        assert!((score_of(2) - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-9);
        assert!((score_of(1) - (1.0 / 61.0)).abs() < 1e-9);
        assert!((score_of(3) - (1.0 / 62.0)).abs() < 1e-9);
    }

    #[test]
    fn rrf_rejects_k_below_one() {
        let err = ReciprocalRankFusion::new(0.5)
            .rerank(&[vec![hit(1, 1.0)]], 1)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn weighted_fusion_requires_matching_weight_count() {
        let lists = vec![vec![hit(1, 1.0)], vec![hit(1, 0.5)]];
        let err = WeightedFusion::new(vec![1.0]).rerank(&lists, 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn weighted_fusion_treats_absence_as_zero_contribution() {
        let list_a = vec![hit(1, 1.0), hit(2, 0.5)];
        let list_b = vec![hit(2, 1.0)];
        let fused = WeightedFusion::new(vec![0.5, 0.5])
            .rerank(&[list_a, list_b], 2)
            .unwrap();

        let score_of = |id: i64| fused.iter().find(|h| h.id == id).unwrap().score as f64;
        assert!((score_of(1) - 0.5).abs() < 1e-9, "1 only in list_a: 0.5*1.0");
        assert!(
            (score_of(2) - 0.75).abs() < 1e-9,
            "2 in both: 0.5*0.5 + 0.5*1.0"
        );
    }

    #[test]
    fn ties_preserve_first_seen_order() {
        let list_a = vec![hit(5, 0.1), hit(1, 0.1)];
        let fused = ReciprocalRankFusion::new(60.0).rerank(&[list_a], 2).unwrap();
        assert_eq!(fused[0].id, 5, "5 appeared first and ties are stable");
    }

    fn arb_list(max_id: i64) -> impl proptest::strategy::Strategy<Value = Vec<VectorHit>> {
        use proptest::prelude::*;
        prop::collection::vec((0..max_id, 0.0f32..1.0f32), 0..8).prop_map(|pairs| {
            let mut seen = std::collections::HashSet::new();
            pairs
                .into_iter()
                .filter(|(id, _)| seen.insert(*id))
                .map(|(id, score)| hit(id, score))
                .collect()
        })
    }

    proptest::proptest! {
        #[test]
        fn rrf_never_returns_more_hits_than_top_k_or_the_fused_universe(
            list_a in arb_list(12),
            list_b in arb_list(12),
            top_k in 1usize..10,
        ) {
            let union_size: std::collections::HashSet<i64> = list_a.iter().chain(list_b.iter()).map(|h| h.id).collect();
            let fused = ReciprocalRankFusion::new(60.0)
                .rerank(&[list_a, list_b], top_k)
                .unwrap();
            prop_assert!(fused.len() <= top_k);
            prop_assert!(fused.len() <= union_size.len());
        }

        #[test]
        fn rrf_scores_are_sorted_descending(
            list_a in arb_list(12),
            list_b in arb_list(12),
        ) {
            let fused = ReciprocalRankFusion::new(60.0)
                .rerank(&[list_a, list_b], 20)
                .unwrap();
            for pair in fused.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }

        #[test]
        fn weighted_fusion_score_never_exceeds_the_weight_sum(
            list_a in arb_list(12),
            list_b in arb_list(12),
        ) {
            let fused = WeightedFusion::new(vec![0.5, 0.5])
                .rerank(&[list_a, list_b], 20)
                .unwrap();
            for h in &fused {
                prop_assert!(h.score <= 1.0 + 1e-6, "score {} exceeds weight sum 1.0", h.score);
            }
        }
    }
}
