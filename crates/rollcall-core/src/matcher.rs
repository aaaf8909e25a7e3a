//! Nearest-embedding match policy.
//!
//! A linear scan is all the gallery sizes here (tens of students) need.

use crate::types::Embedding;

/// Conventional acceptance distance used by dlib-style matchers on raw
/// 128-d embeddings. Extractors with normalized embeddings publish their own.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.6;

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        name: String,
        distance: f32,
    },
    /// No gallery entry fell within tolerance. `best_distance` is `None`
    /// when the gallery was empty.
    Unknown { best_distance: Option<f32> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Matched { name, .. } => Some(name),
            Self::Unknown { .. } => None,
        }
    }
}

/// Strategy for comparing a probe embedding against parallel name/vector sequences.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        names: &[String],
        vectors: &[Embedding],
        tolerance: f32,
    ) -> MatchOutcome;
}

/// Euclidean nearest-neighbour matcher.
///
/// Takes the argmin over all distances (first index wins on ties) and
/// accepts it only when that distance is within `tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        names: &[String],
        vectors: &[Embedding],
        tolerance: f32,
    ) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;

        for (i, vector) in vectors.iter().enumerate().take(names.len()) {
            let distance = probe.euclidean_distance(vector);
            // Strict `<` keeps the lowest index on ties; NaN never wins.
            let better = match best {
                None => !distance.is_nan(),
                Some((_, d)) => distance < d,
            };
            if better {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance <= tolerance => MatchOutcome::Matched {
                name: names[idx].clone(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::Unknown {
                best_distance: Some(distance),
            },
            None => MatchOutcome::Unknown {
                best_distance: None,
            },
        }
    }
}
