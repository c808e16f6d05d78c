//! Deterministic nearest-identity matching.
//!
//! A query embedding is compared against a candidate set by Euclidean
//! distance. Distance maps to a confidence score with `(1 - d) * 100`; the
//! highest confidence at or above the caller's threshold wins and ties go to
//! the lexicographically smallest identity id. Nothing here depends on the
//! order candidates were supplied in.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Embedding, IdentityId};
use crate::infra::{CheckinError, Result};

/// One identity the matcher may choose.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity_id: IdentityId,
    pub embedding: Embedding,
}

impl Candidate {
    pub fn new(identity_id: impl Into<IdentityId>, embedding: impl Into<Embedding>) -> Self {
        Self {
            identity_id: identity_id.into(),
            embedding: embedding.into(),
        }
    }
}

/// The winning candidate for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity_id: IdentityId,
    pub distance: f64,
    /// Raw `(1 - distance) * 100`; may be negative for far-apart vectors.
    pub confidence: f64,
}

/// Best match for one query in a [`match_many`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub query_index: usize,
    pub best: Option<MatchResult>,
}

/// Euclidean (L2) distance between two embeddings of equal length.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(CheckinError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt())
}

/// `(1 - distance) * 100`. Unclamped; thresholds compare against this value.
pub fn confidence_from_distance(distance: f64) -> f64 {
    (1.0 - distance) * 100.0
}

/// Confidence as shown to people: clamped to `[0, 100]`, NaN shown as 0.
pub fn display_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 100.0)
    }
}

/// Find the best candidate for `query` whose confidence is at least `min_confidence`.
///
/// Candidates whose distance is not a number are skipped. A candidate with a
/// different dimensionality than the query is an error, not a skip.
pub fn best_match(
    query: &Embedding,
    candidates: &[Candidate],
    min_confidence: f64,
) -> Result<Option<MatchResult>> {
    let mut best: Option<MatchResult> = None;

    for candidate in candidates {
        let distance = euclidean_distance(query.as_slice(), candidate.embedding.as_slice())?;
        if distance.is_nan() {
            continue;
        }
        let confidence = confidence_from_distance(distance);
        if confidence < min_confidence {
            continue;
        }

        let replace = match &best {
            None => true,
            Some(current) => {
                confidence > current.confidence
                    || (confidence == current.confidence
                        && candidate.identity_id < current.identity_id)
            }
        };

        if replace {
            best = Some(MatchResult {
                identity_id: candidate.identity_id.clone(),
                distance,
                confidence,
            });
        }
    }

    Ok(best)
}

/// Match every query independently against the same candidate set.
///
/// Work is spread over the rayon pool; results come back in query order.
/// Run this from `spawn_blocking` when called on an async runtime.
pub fn match_many(
    queries: &[Embedding],
    candidates: &[Candidate],
    min_confidence: f64,
) -> Result<Vec<QueryMatch>> {
    queries
        .par_iter()
        .enumerate()
        .map(|(query_index, query)| {
            best_match(query, candidates, min_confidence)
                .map(|best| QueryMatch { query_index, best })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_distance_and_confidence() {
        let d = euclidean_distance(&[0.0, 0.0], &[0.3, 0.4]).unwrap();
        assert!((d - 0.5).abs() < 1e-12);
        assert!((confidence_from_distance(d) - 50.0).abs() < 1e-9);
        assert_eq!(confidence_from_distance(0.0), 100.0);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let err = euclidean_distance(&[0.0, 1.0], &[0.0]).unwrap_err();
        assert!(matches!(
            err,
            CheckinError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));

        let candidates = vec![Candidate::new("a", vec![0.0_f64])];
        assert!(best_match(&emb(&[0.0, 0.0]), &candidates, 0.0).is_err());
    }

    #[test]
    fn test_empty_candidates_match_nothing() {
        assert_eq!(best_match(&emb(&[0.1]), &[], 0.0).unwrap(), None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let candidates = vec![Candidate::new("a", vec![0.5_f64])];
        // distance 0.5 -> confidence exactly 50
        let hit = best_match(&emb(&[0.0]), &candidates, 50.0).unwrap();
        assert_eq!(hit.unwrap().identity_id.as_str(), "a");

        let miss = best_match(&emb(&[0.0]), &candidates, 50.000001).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_highest_confidence_wins() {
        let candidates = vec![
            Candidate::new("far", vec![0.4_f64]),
            Candidate::new("near", vec![0.1_f64]),
        ];
        let best = best_match(&emb(&[0.0]), &candidates, 0.0).unwrap().unwrap();
        assert_eq!(best.identity_id.as_str(), "near");
        assert!((best.confidence - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_on_smallest_id_regardless_of_order() {
        let forward = vec![
            Candidate::new("v2", vec![0.2_f64]),
            Candidate::new("v1", vec![-0.2_f64]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = best_match(&emb(&[0.0]), &forward, 0.0).unwrap().unwrap();
        let b = best_match(&emb(&[0.0]), &reversed, 0.0).unwrap().unwrap();
        assert_eq!(a.identity_id.as_str(), "v1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_nan_distance_is_skipped() {
        let candidates = vec![
            Candidate::new("broken", vec![f64::NAN]),
            Candidate::new("ok", vec![0.1_f64]),
        ];
        let best = best_match(&emb(&[0.0]), &candidates, 0.0).unwrap().unwrap();
        assert_eq!(best.identity_id.as_str(), "ok");
    }

    #[test]
    fn test_display_confidence_clamps() {
        assert_eq!(display_confidence(-20.0), 0.0);
        assert_eq!(display_confidence(150.0), 100.0);
        assert_eq!(display_confidence(f64::NAN), 0.0);
        assert_eq!(display_confidence(93.25), 93.25);
    }

    #[test]
    fn test_match_many_preserves_query_order_and_allows_shared_winner() {
        let candidates = vec![
            Candidate::new("v1", vec![0.0_f64, 0.0]),
            Candidate::new("v2", vec![5.0_f64, 5.0]),
        ];
        let queries = vec![emb(&[0.05, 0.0]), emb(&[9.0, 9.0]), emb(&[0.0, 0.1])];

        let results = match_many(&queries, &candidates, 40.0).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].query_index, 0);
        assert_eq!(results[0].best.as_ref().unwrap().identity_id.as_str(), "v1");
        assert!(results[1].best.is_none());
        assert_eq!(results[2].best.as_ref().unwrap().identity_id.as_str(), "v1");
    }
}
