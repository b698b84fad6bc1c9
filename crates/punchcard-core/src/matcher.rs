//! Identity matching of an observed embedding against the enrolled gallery.
//!
//! An observed embedding matches a reference embedding when their
//! Euclidean distance is strictly below the threshold. Two strategies are
//! provided; both are pure and never touch storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Embedding, WorkerEmbeddings, WorkerId};

/// Default Euclidean distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// A gallery hit.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub worker_id: WorkerId,
    pub name: String,
    /// Euclidean distance to the matching reference embedding.
    pub distance: f32,
}

/// Strategy for comparing an observed embedding against a gallery of enrolled workers.
pub trait Matcher {
    fn compare(
        &self,
        observed: &Embedding,
        gallery: &[WorkerEmbeddings],
        threshold: f32,
    ) -> Option<MatchResult>;
}

/// Nearest reference embedding across the whole gallery, if under threshold.
///
/// Always visits every entry. Ties on distance keep the earlier gallery
/// entry, so two workers both under threshold resolve deterministically to
/// whichever is genuinely closer.
pub struct ClosestMatcher;

impl Matcher for ClosestMatcher {
    fn compare(
        &self,
        observed: &Embedding,
        gallery: &[WorkerEmbeddings],
        threshold: f32,
    ) -> Option<MatchResult> {
        let mut best: Option<(&WorkerEmbeddings, f32)> = None;

        for entry in gallery {
            for reference in &entry.embeddings {
                let distance = observed.euclidean_distance(reference);
                let is_better = match best {
                    None => true,
                    Some((_, best_distance)) => distance < best_distance,
                };
                if is_better {
                    best = Some((entry, distance));
                }
            }
        }

        match best {
            Some((entry, distance)) if distance < threshold => Some(MatchResult {
                worker_id: entry.worker_id.clone(),
                name: entry.name.clone(),
                distance,
            }),
            _ => None,
        }
    }
}

/// First reference embedding under threshold in gallery order.
///
/// Cheaper on large galleries but order-dependent when two workers are both
/// under threshold.
pub struct FirstMatchMatcher;

impl Matcher for FirstMatchMatcher {
    fn compare(
        &self,
        observed: &Embedding,
        gallery: &[WorkerEmbeddings],
        threshold: f32,
    ) -> Option<MatchResult> {
        gallery.iter().find_map(|entry| {
            entry
                .embeddings
                .iter()
                .map(|reference| observed.euclidean_distance(reference))
                .find(|&distance| distance < threshold)
                .map(|distance| MatchResult {
                    worker_id: entry.worker_id.clone(),
                    name: entry.name.clone(),
                    distance,
                })
        })
    }
}

/// Configured matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    Closest,
    First,
}

impl MatchPolicy {
    pub fn compare(
        &self,
        observed: &Embedding,
        gallery: &[WorkerEmbeddings],
        threshold: f32,
    ) -> Option<MatchResult> {
        match self {
            MatchPolicy::Closest => ClosestMatcher.compare(observed, gallery, threshold),
            MatchPolicy::First => FirstMatchMatcher.compare(observed, gallery, threshold),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Closest => f.write_str("closest"),
            MatchPolicy::First => f.write_str("first"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closest" => Ok(MatchPolicy::Closest),
            "first" => Ok(MatchPolicy::First),
            other => Err(format!("unknown match policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    /// Unit vector along `axis`, scaled.
    fn axis(axis: usize, scale: f32) -> Embedding {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[axis] = scale;
        Embedding::new(values)
    }

    fn entry(id: &str, embeddings: Vec<Embedding>) -> WorkerEmbeddings {
        WorkerEmbeddings {
            worker_id: id.into(),
            name: format!("worker {id}"),
            embeddings,
        }
    }

    fn gallery() -> Vec<WorkerEmbeddings> {
        vec![
            entry("w1", vec![axis(0, 1.0), axis(1, 1.0)]),
            entry("w2", vec![axis(2, 1.0)]),
            entry("w3", vec![]),
        ]
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let observed = axis(0, 1.0);
        assert!(ClosestMatcher.compare(&observed, &[], DEFAULT_MATCH_THRESHOLD).is_none());
        assert!(FirstMatchMatcher.compare(&observed, &[], DEFAULT_MATCH_THRESHOLD).is_none());
    }

    #[test]
    fn test_every_enrolled_embedding_self_matches() {
        let gallery = gallery();
        for policy in [MatchPolicy::Closest, MatchPolicy::First] {
            for entry in &gallery {
                for reference in &entry.embeddings {
                    let hit = policy
                        .compare(reference, &gallery, DEFAULT_MATCH_THRESHOLD)
                        .expect("self match");
                    assert_eq!(hit.worker_id, entry.worker_id, "policy {policy}");
                    assert_eq!(hit.distance, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_far_from_everything_is_none() {
        // Distance to every axis vector is sqrt(1 + 1) > 0.4.
        let observed = axis(5, 1.0);
        let gallery = gallery();
        assert!(ClosestMatcher.compare(&observed, &gallery, DEFAULT_MATCH_THRESHOLD).is_none());
        assert!(FirstMatchMatcher.compare(&observed, &gallery, DEFAULT_MATCH_THRESHOLD).is_none());
    }

    #[test]
    fn test_distance_equal_to_threshold_is_not_a_match() {
        let gallery = vec![entry("w1", vec![axis(0, 0.0)])];
        let observed = axis(0, 0.5);
        assert!(ClosestMatcher.compare(&observed, &gallery, 0.5).is_none());
        assert!(ClosestMatcher.compare(&observed, &gallery, 0.51).is_some());
    }

    #[test]
    fn test_closest_prefers_nearer_worker_over_gallery_order() {
        // Both workers are under threshold; w2 is nearer but enrolled later.
        let gallery = vec![
            entry("w1", vec![axis(0, 0.3)]),
            entry("w2", vec![axis(0, 0.1)]),
        ];
        let observed = axis(0, 0.0);

        let closest = ClosestMatcher.compare(&observed, &gallery, 0.4).unwrap();
        assert_eq!(closest.worker_id.as_str(), "w2");
        assert!((closest.distance - 0.1).abs() < 1e-6);

        let first = FirstMatchMatcher.compare(&observed, &gallery, 0.4).unwrap();
        assert_eq!(first.worker_id.as_str(), "w1");
    }

    #[test]
    fn test_mismatched_dimension_never_matches() {
        let gallery = vec![entry("w1", vec![Embedding::new(vec![0.0; 3])])];
        let observed = Embedding::new(vec![0.0; 4]);
        assert!(ClosestMatcher.compare(&observed, &gallery, 10.0).is_none());
        assert!(FirstMatchMatcher.compare(&observed, &gallery, 10.0).is_none());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("closest".parse::<MatchPolicy>(), Ok(MatchPolicy::Closest));
        assert_eq!("first".parse::<MatchPolicy>(), Ok(MatchPolicy::First));
        assert!("best".parse::<MatchPolicy>().is_err());
    }
}
