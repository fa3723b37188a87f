//! Reciprocal Rank Fusion: score = Σ weight / (k + rank + 1)
//!
//! Ranks are zero-based. Only rank position is used, so lists whose scores
//! live on unrelated scales can be fused safely.

use std::collections::HashMap;

use lifelog_core::types::DocumentId;

/// A ranked list with the weight its ranks contribute.
#[derive(Debug, Clone, Copy)]
pub struct RankedList<'a> {
    pub ids: &'a [DocumentId],
    pub weight: f64,
}

/// Fused score per id, sorted descending. Ties keep first-appearance order
/// across the lists as given.
pub fn fuse(lists: &[RankedList<'_>], k: f64) -> Vec<(DocumentId, f64)> {
    let mut order: Vec<DocumentId> = Vec::new();
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for list in lists {
        for (rank, id) in list.ids.iter().enumerate() {
            let contribution = list.weight / (k + rank as f64 + 1.0);
            match scores.get_mut(id.as_str()) {
                Some(score) => *score += contribution,
                None => {
                    scores.insert(id.as_str(), contribution);
                    order.push(id.clone());
                }
            }
        }
    }
    let mut fused: Vec<(DocumentId, f64)> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(id.as_str()).copied().unwrap_or_default();
            (id, score)
        })
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(xs: &[&str]) -> Vec<DocumentId> {
        xs.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn shared_documents_accumulate() {
        let a = ids(&["x", "y"]);
        let b = ids(&["y", "z"]);
        let fused = fuse(&[RankedList { ids: &a, weight: 0.5 }, RankedList { ids: &b, weight: 0.5 }], 60.0);
        assert_eq!(fused[0].0, "y");
        let expected = 0.5 / 62.0 + 0.5 / 61.0;
        assert!((fused[0].1 - expected).abs() < 1e-12);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn zero_weight_list_only_breaks_ties() {
        let a = ids(&["x"]);
        let b = ids(&["y"]);
        let fused = fuse(&[RankedList { ids: &a, weight: 1.0 }, RankedList { ids: &b, weight: 0.0 }], 60.0);
        assert_eq!(fused[0].0, "x");
        assert!(fused[1].1.abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn ahead_in_both_lists_never_fuses_lower(
            n in 2usize..20,
            swaps in proptest::collection::vec((0usize..20, 0usize..20), 0..10),
            x_pos in 0usize..20,
            gap_a in 1usize..20,
            gap_b in 1usize..20,
            weight in 0.0f64..=1.0,
        ) {
            // Two permutations of the same ids; "x" is placed ahead of "y" in both.
            let base: Vec<DocumentId> = (0..n).map(|i| format!("d{i}")).collect();
            let mut a = base.clone();
            let mut b = base;
            for (i, j) in swaps {
                b.swap(i % n, j % n);
            }
            let place = |list: &mut Vec<DocumentId>, gap: usize| {
                let xi = x_pos % (list.len() - 1);
                let yi = (xi + gap).min(list.len());
                list.insert(yi, "y".to_string());
                list.insert(xi, "x".to_string());
            };
            place(&mut a, gap_a);
            place(&mut b, gap_b);
            let fused = fuse(&[RankedList { ids: &a, weight }, RankedList { ids: &b, weight: 1.0 - weight }], 60.0);
            let score = |id: &str| fused.iter().find(|(d, _)| d == id).map(|(_, s)| *s).unwrap_or_default();
            prop_assert!(score("x") >= score("y"));
        }
    }
}
