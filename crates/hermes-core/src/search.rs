//! Pure hybrid search fusion (§4.J, steps 3–5).
//!
//! The concurrent fan-out to the keyword index and the vector store (steps
//! 1–2) is I/O and lives in the `hermes` crate; this module only merges
//! the two already-fetched hit lists and scores them, so it has no
//! runtime or network dependency and is exhaustively property-testable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single hit from either the keyword index or the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub document_id: String,
    pub score: f32,
}

/// The three fusion weights from §4.J. The implementer may also accept
/// caller-supplied weights, so this isn't a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub keyword: f32,
    pub semantic: f32,
    pub both_bonus: f32,
}

impl Weights {
    pub const BALANCED: Weights = Weights {
        keyword: 0.4,
        semantic: 0.4,
        both_bonus: 0.2,
    };
    pub const KEYWORD_FOCUSED: Weights = Weights {
        keyword: 0.7,
        semantic: 0.2,
        both_bonus: 0.1,
    };
    pub const SEMANTIC_FOCUSED: Weights = Weights {
        keyword: 0.2,
        semantic: 0.7,
        both_bonus: 0.1,
    };
}

/// One side's outcome: either a hit list or an error message. Used so the
/// caller can pass through a partial failure (§4.J step 2, §9) without the
/// fusion step needing to know about transport-level error types.
#[derive(Debug, Clone)]
pub enum SideResult {
    Ok(Vec<Hit>),
    Err(String),
}

/// Both sides failed; nothing to fuse.
#[derive(Debug, Clone, PartialEq)]
pub struct BothFailedError {
    pub keyword_error: String,
    pub semantic_error: String,
}

impl std::fmt::Display for BothFailedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "both keyword and semantic search failed: keyword={}, semantic={}",
            self.keyword_error, self.semantic_error
        )
    }
}

impl std::error::Error for BothFailedError {}

/// A fused result row, carrying the component scores that produced the
/// final `hybrid_score` so callers can explain ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub document_id: String,
    pub keyword_score: f32,
    pub semantic_score: f32,
    pub matched_in_both: bool,
    pub hybrid_score: f32,
}

/// Merge keyword and semantic hit lists, score, sort, and truncate to `n`
/// (§4.J steps 3–5).
///
/// If both sides failed, returns [`BothFailedError`]. If exactly one
/// failed, the other side's hits are returned with the missing score set
/// to 0 and `matched_in_both=false` (§4.J step 2, §9: partial failure is a
/// product feature, not an error).
pub fn fuse(
    keyword: SideResult,
    semantic: SideResult,
    weights: Weights,
    n: usize,
) -> Result<Vec<FusedResult>, BothFailedError> {
    let (keyword_hits, semantic_hits) = match (keyword, semantic) {
        (SideResult::Err(kw_err), SideResult::Err(sem_err)) => {
            return Err(BothFailedError {
                keyword_error: kw_err,
                semantic_error: sem_err,
            })
        }
        (SideResult::Ok(kw), SideResult::Err(_)) => (kw, Vec::new()),
        (SideResult::Err(_), SideResult::Ok(sem)) => (Vec::new(), sem),
        (SideResult::Ok(kw), SideResult::Ok(sem)) => (kw, sem),
    };

    let mut merged: HashMap<String, (f32, f32, bool, bool)> = HashMap::new();
    for hit in keyword_hits {
        let entry = merged.entry(hit.document_id).or_insert((0.0, 0.0, false, false));
        entry.0 = hit.score;
        entry.2 = true;
    }
    for hit in semantic_hits {
        let entry = merged.entry(hit.document_id).or_insert((0.0, 0.0, false, false));
        entry.1 = hit.score;
        entry.3 = true;
    }

    let mut results: Vec<FusedResult> = merged
        .into_iter()
        .map(|(document_id, (kw_score, sem_score, in_kw, in_sem))| {
            let matched_in_both = in_kw && in_sem;
            let raw = weights.keyword * kw_score
                + weights.semantic * sem_score
                + if matched_in_both { weights.both_bonus } else { 0.0 };
            FusedResult {
                document_id,
                keyword_score: kw_score,
                semantic_score: sem_score,
                matched_in_both,
                hybrid_score: raw.clamp(0.0, 1.0),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    results.truncate(n);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            document_id: id.to_string(),
            score,
        }
    }

    #[test]
    fn both_fail_returns_composite_error() {
        let err = fuse(
            SideResult::Err("kw down".to_string()),
            SideResult::Err("sem down".to_string()),
            Weights::BALANCED,
            5,
        )
        .unwrap_err();
        assert_eq!(err.keyword_error, "kw down");
        assert_eq!(err.semantic_error, "sem down");
    }

    #[test]
    fn s5_semantic_failure_scores_keyword_only() {
        let results = fuse(
            SideResult::Ok(vec![hit("d1", 0.9), hit("d2", 0.7)]),
            SideResult::Err("sem down".to_string()),
            Weights::BALANCED,
            5,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "d1");
        assert_eq!(results[0].semantic_score, 0.0);
        assert!(!results[0].matched_in_both);
        assert!((results[0].hybrid_score - 0.9 * Weights::BALANCED.keyword).abs() < 1e-6);
    }

    #[test]
    fn keyword_failure_scores_semantic_only() {
        let results = fuse(
            SideResult::Err("kw down".to_string()),
            SideResult::Ok(vec![hit("d1", 0.8)]),
            Weights::BALANCED,
            5,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].keyword_score, 0.0);
        assert!(!results[0].matched_in_both);
    }

    #[test]
    fn matched_in_both_gets_bonus() {
        let results = fuse(
            SideResult::Ok(vec![hit("d1", 0.5)]),
            SideResult::Ok(vec![hit("d1", 0.5)]),
            Weights::BALANCED,
            5,
        )
        .unwrap();
        assert!(results[0].matched_in_both);
        let expected = (0.4 * 0.5 + 0.4 * 0.5 + 0.2_f32).clamp(0.0, 1.0);
        assert!((results[0].hybrid_score - expected).abs() < 1e-6);
    }

    #[test]
    fn truncates_to_n_after_sorting() {
        let results = fuse(
            SideResult::Ok(vec![hit("d1", 0.9), hit("d2", 0.5), hit("d3", 0.1)]),
            SideResult::Ok(vec![]),
            Weights::BALANCED,
            2,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "d1");
        assert_eq!(results[1].document_id, "d2");
    }

    #[test]
    fn score_clamped_to_one() {
        let weights = Weights {
            keyword: 1.0,
            semantic: 1.0,
            both_bonus: 1.0,
        };
        let results = fuse(
            SideResult::Ok(vec![hit("d1", 1.0)]),
            SideResult::Ok(vec![hit("d1", 1.0)]),
            weights,
            5,
        )
        .unwrap();
        assert_eq!(results[0].hybrid_score, 1.0);
    }

    proptest! {
        /// Fusion monotonicity (§8.9): increasing either score never
        /// decreases a document's rank relative to a fixed competitor.
        #[test]
        fn prop_monotonic_in_keyword_score(
            low in 0.0f32..0.5,
            delta in 0.0f32..0.5,
            competitor in 0.0f32..1.0f32,
        ) {
            let high = low + delta;
            let weights = Weights::BALANCED;

            let low_results = fuse(
                SideResult::Ok(vec![hit("target", low), hit("other", competitor)]),
                SideResult::Ok(vec![]),
                weights,
                2,
            ).unwrap();
            let high_results = fuse(
                SideResult::Ok(vec![hit("target", high), hit("other", competitor)]),
                SideResult::Ok(vec![]),
                weights,
                2,
            ).unwrap();

            let rank = |results: &[FusedResult], id: &str| {
                results.iter().position(|r| r.document_id == id).unwrap()
            };
            // A higher keyword score must not rank `target` worse.
            prop_assert!(rank(&high_results, "target") <= rank(&low_results, "target"));
        }

        #[test]
        fn prop_hybrid_score_always_in_unit_range(
            kw in 0.0f32..1.0f32,
            sem in 0.0f32..1.0f32,
        ) {
            let results = fuse(
                SideResult::Ok(vec![hit("d1", kw)]),
                SideResult::Ok(vec![hit("d1", sem)]),
                Weights::BALANCED,
                1,
            ).unwrap();
            prop_assert!(results[0].hybrid_score >= 0.0 && results[0].hybrid_score <= 1.0);
        }
    }
}
