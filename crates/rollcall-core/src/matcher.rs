//! Nearest-reference face matching against one enrolled profile.

use crate::types::{Embedding, EnrolledProfile, MatchLabel, MatchResult};

/// Matches observed embeddings against the reference set of a single profile.
///
/// The observed embedding is compared with every reference; the smallest Euclidean
/// distance decides. It is accepted when that distance is strictly
/// below `distance_threshold`.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    label: String,
    references: Vec<Embedding>,
    distance_threshold: f32,
}

impl FaceMatcher {
    pub fn new(profile: &EnrolledProfile, distance_threshold: f32) -> Self {
        Self {
            label: profile.label.clone(),
            references: profile.embeddings.clone(),
            distance_threshold,
        }
    }

    /// Label of the enrolled identity.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn best_match(&self, observed: &Embedding) -> MatchResult {
        let distance = self
            .references
            .iter()
            .map(|reference| observed.euclidean_distance(reference))
            .fold(f32::INFINITY, f32::min);

        let label = if distance < self.distance_threshold {
            MatchLabel::Identity(self.label.clone())
        } else {
            MatchLabel::NoMatch
        };

        MatchResult { label, distance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(refs: &[&[f32]]) -> EnrolledProfile {
        EnrolledProfile::new(
            "Alice",
            refs.iter().map(|r| Embedding::new(r.to_vec())).collect(),
        )
    }

    #[test]
    fn test_nearest_reference_wins() {
        // Far decoy first, close reference last.
        let matcher = FaceMatcher::new(&profile(&[&[5.0, 5.0], &[1.0, 0.1]]), 0.7);
        let result = matcher.best_match(&Embedding::new(vec![1.0, 0.0]));
        assert!(result.is_match("Alice"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_distance_at_threshold_is_rejected() {
        let matcher = FaceMatcher::new(&profile(&[&[0.0, 0.0]]), 0.5);
        let result = matcher.best_match(&Embedding::new(vec![0.5, 0.0]));
        assert_eq!(result.label, MatchLabel::NoMatch);
        assert!((result.distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_far_face_is_unknown() {
        let matcher = FaceMatcher::new(&profile(&[&[1.0, 0.0]]), 0.7);
        let result = matcher.best_match(&Embedding::new(vec![0.0, 1.0]));
        assert_eq!(result.label, MatchLabel::NoMatch);
    }

    #[test]
    fn test_empty_profile_never_matches() {
        let matcher = FaceMatcher::new(&profile(&[]), 1.0);
        let result = matcher.best_match(&Embedding::new(vec![0.0, 0.0]));
        assert_eq!(result.label, MatchLabel::NoMatch);
        assert!(result.distance.is_infinite());
    }
}
