use serde::{Deserialize, Serialize};

/// Face embedding vector (512-dimensional for the default ArcFace model).
///
/// Stored embeddings are L2-normalized at extraction time, so Euclidean
/// distance between two embeddings lies in [0, 2].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance to another embedding.
    ///
    /// Lower = more similar. Dimension mismatches compare only the common
    /// prefix; callers are expected to keep a single model version per
    /// deployment.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// L2-normalize in place. A zero vector is left untouched.
    pub fn normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }
}

/// One enrolled signature under comparison, tagged with the registry
/// position it was loaded for.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub position: usize,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Euclidean distance of the best candidate (0.0 for an empty gallery).
    pub distance: f32,
    /// Gallery position of the match (if any).
    pub position: Option<usize>,
}

impl MatchOutcome {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            distance: 0.0,
            position: None,
        }
    }
}

/// Strategy for comparing a probe embedding against enrolled signatures.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> MatchOutcome;
}

/// Minimum-distance matcher with full gallery traversal.
///
/// Always visits every entry; a strict `<` comparison means equal
/// distances resolve to the earliest gallery position, keeping the
/// tie-break deterministic.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_pos: Option<usize> = None;

        for entry in gallery {
            let dist = probe.distance(&entry.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_pos = Some(entry.position);
            }
        }

        match best_pos {
            Some(pos) if best_dist <= threshold => MatchOutcome {
                matched: true,
                distance: best_dist,
                position: Some(pos),
            },
            Some(_) => MatchOutcome {
                matched: false,
                distance: best_dist,
                position: None,
            },
            None => MatchOutcome::no_match(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(position: usize, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            position,
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_unit() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.distance(&b) - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut e = Embedding::new(vec![3.0, 4.0]);
        e.normalize();
        let norm: f32 = e.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut e = Embedding::new(vec![0.0, 0.0]);
        e.normalize();
        assert_eq!(e.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_nearest_wins_over_first_hit() {
        // Two entries inside the threshold; the closer one must win even
        // though it appears later in the gallery.
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            entry(0, vec![0.6, 0.8]),
            entry(1, vec![0.99, 0.14]),
        ];
        let outcome = NearestMatcher.best_match(&probe, &gallery, 1.0);
        assert!(outcome.matched);
        assert_eq!(outcome.position, Some(1));
    }

    #[test]
    fn test_tie_resolves_to_earlier_position() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry(3, vec![1.0, 0.0]), entry(7, vec![0.0, 1.0])];
        let outcome = NearestMatcher.best_match(&probe, &gallery, 2.0);
        assert!(outcome.matched);
        assert_eq!(outcome.position, Some(3));
    }

    #[test]
    fn test_threshold_excludes_distant_best() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry(0, vec![-1.0, 0.0])];
        let outcome = NearestMatcher.best_match(&probe, &gallery, 0.5);
        assert!(!outcome.matched);
        assert_eq!(outcome.position, None);
        assert!((outcome.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let outcome = NearestMatcher.best_match(&probe, &[], 1.0);
        assert!(!outcome.matched);
        assert_eq!(outcome.distance, 0.0);
    }
}
