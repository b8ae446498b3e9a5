use std::fmt;

use crate::detection::domain::detection::Detection;

/// Cluster assignment for one detection. Label values are only meaningful
/// within a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterLabel(pub i32);

impl ClusterLabel {
    /// Detections not assigned to any person cluster.
    pub const NOISE: ClusterLabel = ClusterLabel(-1);

    pub fn is_noise(self) -> bool {
        self == Self::NOISE
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noise() {
            write!(f, "noise")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One non-noise group of detections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonCluster {
    pub label: ClusterLabel,
    /// Lowest detection index carrying `label`.
    pub representative_index: usize,
    pub face_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterSummary {
    pub label: ClusterLabel,
    pub face_count: usize,
}

/// Result of clustering a run's detection sequence.
///
/// `labels[i]` is the label of detection `i`. `clusters` holds one entry per
/// non-noise label, ordered by label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Clustering {
    pub labels: Vec<ClusterLabel>,
    pub clusters: Vec<PersonCluster>,
}

impl Clustering {
    /// Derives the per-cluster view from a label array. Counts are always
    /// recomputed from `labels`.
    pub fn from_labels(labels: Vec<ClusterLabel>) -> Self {
        let mut clusters: Vec<PersonCluster> = Vec::new();
        for (index, &label) in labels.iter().enumerate() {
            if label.is_noise() {
                continue;
            }
            match clusters.iter_mut().find(|c| c.label == label) {
                Some(cluster) => cluster.face_count += 1,
                None => clusters.push(PersonCluster {
                    label,
                    representative_index: index,
                    face_count: 1,
                }),
            }
        }
        clusters.sort_by_key(|c| c.label);
        Self { labels, clusters }
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    pub fn summaries(&self) -> Vec<ClusterSummary> {
        self.clusters
            .iter()
            .map(|c| ClusterSummary {
                label: c.label,
                face_count: c.face_count,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Groups detections into person clusters by embedding similarity.
///
/// Implementations must be deterministic for a fixed input order.
pub trait ClusterEngine: Send {
    fn cluster(&self, detections: &[Detection]) -> Result<Clustering, Box<dyn std::error::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[i32]) -> Vec<ClusterLabel> {
        values.iter().map(|&v| ClusterLabel(v)).collect()
    }

    #[test]
    fn test_from_labels_counts_and_representatives() {
        let c = Clustering::from_labels(labels(&[1, 0, -1, 0, 1, 1]));

        assert_eq!(c.clusters.len(), 2);
        assert_eq!(c.clusters[0].label, ClusterLabel(0));
        assert_eq!(c.clusters[0].representative_index, 1);
        assert_eq!(c.clusters[0].face_count, 2);
        assert_eq!(c.clusters[1].representative_index, 0);
        assert_eq!(c.clusters[1].face_count, 3);
        assert_eq!(c.noise_count(), 1);
    }

    #[test]
    fn test_counts_partition_the_labels() {
        let c = Clustering::from_labels(labels(&[-1, 2, 2, -1, 0, 1, 1, 1]));
        let clustered: usize = c.summaries().iter().map(|s| s.face_count).sum();
        assert_eq!(clustered + c.noise_count(), c.labels.len());
    }

    #[test]
    fn test_all_noise_is_empty_but_valid() {
        let c = Clustering::from_labels(labels(&[-1, -1]));
        assert!(c.is_empty());
        assert_eq!(c.noise_count(), 2);
        assert!(c.summaries().is_empty());
    }

    #[test]
    fn test_label_display() {
        assert_eq!(ClusterLabel::NOISE.to_string(), "noise");
        assert_eq!(ClusterLabel(3).to_string(), "3");
    }
}
