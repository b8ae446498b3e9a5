use crate::clustering::domain::cluster_engine::{ClusterEngine, ClusterLabel, Clustering};
use crate::detection::domain::detection::Detection;
use crate::shared::constants::{DEFAULT_CLUSTERING_EPS, DEFAULT_MIN_SAMPLES};
use crate::shared::math::{euclidean_distance, find, union};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClusterInputError {
    #[error("invalid eps {0}: must be finite and positive")]
    InvalidEps(f64),
    #[error("min_samples must be at least 1")]
    InvalidMinSamples,
    #[error("detection {index} has a {found}-dimensional embedding, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("detection {index} has a non-finite embedding value")]
    NonFinite { index: usize },
}

/// Density-based clustering (DBSCAN) over face embeddings.
///
/// A detection is a core point when at least `min_samples` *other*
/// detections lie within `eps` (inclusive). Clusters are connected
/// components of core points; non-core points within `eps` of a core point
/// join the lowest-labelled such cluster, everything else is noise.
/// Labels are assigned 0, 1, 2, ... in order of each cluster's lowest core
/// index, so the result depends only on input order and parameters.
pub struct DbscanClusterEngine {
    eps: f64,
    min_samples: usize,
}

impl DbscanClusterEngine {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn validate(&self, detections: &[Detection]) -> Result<(), ClusterInputError> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(ClusterInputError::InvalidEps(self.eps));
        }
        if self.min_samples == 0 {
            return Err(ClusterInputError::InvalidMinSamples);
        }
        let Some(first) = detections.first() else {
            return Ok(());
        };
        let expected = first.embedding.len();
        for (index, d) in detections.iter().enumerate() {
            if d.embedding.len() != expected {
                return Err(ClusterInputError::DimensionMismatch {
                    index,
                    expected,
                    found: d.embedding.len(),
                });
            }
            if d.embedding.iter().any(|v| !v.is_finite()) {
                return Err(ClusterInputError::NonFinite { index });
            }
        }
        Ok(())
    }

    /// Clusters raw embedding vectors. Inputs must already be validated.
    fn label(&self, embeddings: &[&[f32]]) -> Vec<ClusterLabel> {
        let n = embeddings.len();

        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if euclidean_distance(embeddings[i], embeddings[j]) <= self.eps {
                    neighbors[i].push(j);
                    neighbors[j].push(i);
                }
            }
        }

        let is_core: Vec<bool> = neighbors
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();

        let mut parent: Vec<usize> = (0..n).collect();
        for i in 0..n {
            if !is_core[i] {
                continue;
            }
            for &j in &neighbors[i] {
                if is_core[j] {
                    union(&mut parent, i, j);
                }
            }
        }

        // Roots are the lowest member of each set, so walking core points in
        // ascending order numbers clusters by their first core index.
        let mut root_label: Vec<Option<i32>> = vec![None; n];
        let mut labels = vec![ClusterLabel::NOISE; n];
        let mut next_label = 0;
        for i in 0..n {
            if !is_core[i] {
                continue;
            }
            let root = find(&mut parent, i);
            let label = *root_label[root].get_or_insert_with(|| {
                next_label += 1;
                next_label - 1
            });
            labels[i] = ClusterLabel(label);
        }

        for i in 0..n {
            if is_core[i] {
                continue;
            }
            if let Some(label) = neighbors[i]
                .iter()
                .filter(|&&j| is_core[j])
                .map(|&j| labels[j])
                .min()
            {
                labels[i] = label;
            }
        }

        labels
    }
}

impl Default for DbscanClusterEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTERING_EPS, DEFAULT_MIN_SAMPLES)
    }
}

impl ClusterEngine for DbscanClusterEngine {
    fn cluster(&self, detections: &[Detection]) -> Result<Clustering, Box<dyn std::error::Error>> {
        self.validate(detections)?;
        if detections.is_empty() {
            return Ok(Clustering::default());
        }

        let embeddings: Vec<&[f32]> = detections.iter().map(|d| d.embedding.as_slice()).collect();
        let clustering = Clustering::from_labels(self.label(&embeddings));

        log::debug!(
            "DBSCAN (eps={}, min_samples={}): {} detections -> {} clusters, {} noise",
            self.eps,
            self.min_samples,
            detections.len(),
            clustering.clusters.len(),
            clustering.noise_count()
        );
        Ok(clustering)
    }
}
