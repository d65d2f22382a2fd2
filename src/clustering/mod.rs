//! Soft clustering of one tree level.
//!
//! Embeddings are reduced with [`reduce::UmapReducer`], a [`gmm::GaussianMixture`] assigns
//! membership probabilities, and the selection step turns probabilities into clusters:
//! threshold admission, minimum-size filtering, maximum-size capping, and orphan
//! reassignment. Any failure along the way degrades to a single cluster holding every node,
//! so callers never see an error.

pub mod gmm;
pub mod reduce;

use crate::config::ClusteringConfig;
use crate::node::{Cluster, Node};
use thiserror::Error;

/// Internal clustering failures; always recovered by the engine.
#[derive(Debug, Error)]
pub enum ClusteringError {
    /// Not enough points to fit.
    #[error("Not enough points to cluster")]
    EmptyInput,
    /// Points have inconsistent dimensions.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Dimension of the first point.
        expected: usize,
        /// Offending dimension.
        found: usize,
    },
    /// A parameter was out of range.
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        message: &'static str,
    },
    /// The computation produced NaN or infinity.
    #[error("Non-finite values in {0}")]
    NonFinite(&'static str),
    /// Array construction failed.
    #[error("Numeric error: {0}")]
    Numeric(String),
}

/// Groups the nodes of one level into soft clusters.
#[derive(Debug, Clone)]
pub struct ClusteringEngine {
    config: ClusteringConfig,
}

impl ClusteringEngine {
    /// Create an engine with the given knobs.
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Cluster `nodes`; member indices in the result refer to positions in `nodes`.
    pub fn cluster(&self, nodes: &[Node]) -> Vec<Cluster> {
        if nodes.len() < self.config.min_cluster_size {
            tracing::debug!(
                nodes = nodes.len(),
                min_cluster_size = self.config.min_cluster_size,
                "Too few nodes to cluster; using a single cluster"
            );
            return vec![Cluster::single(nodes)];
        }

        let Some(embeddings) = collect_embeddings(nodes) else {
            tracing::warn!(
                nodes = nodes.len(),
                "Missing or inconsistent embeddings; using a single cluster"
            );
            return vec![Cluster::single(nodes)];
        };

        match self.soft_cluster(nodes, &embeddings) {
            Ok(clusters) if !clusters.is_empty() => {
                tracing::debug!(nodes = nodes.len(), clusters = clusters.len(), "Clustered level");
                clusters
            }
            Ok(_) => {
                tracing::debug!(
                    nodes = nodes.len(),
                    "No cluster met the minimum size; using a single cluster"
                );
                vec![Cluster::single(nodes)]
            }
            Err(error) => {
                tracing::warn!(%error, nodes = nodes.len(), "Clustering failed; using a single cluster");
                vec![Cluster::single(nodes)]
            }
        }
    }

    fn soft_cluster(
        &self,
        nodes: &[Node],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<Cluster>, ClusteringError> {
        let config = &self.config;
        let reduced = reduce::UmapReducer::new(config.reduction_dimension, config.n_neighbors)
            .with_epochs(config.reduction_epochs)
            .with_seed(config.random_seed)
            .fit_transform(embeddings)?;

        let k = estimate_cluster_count(nodes.len(), config);
        let probabilities = gmm::GaussianMixture::new(k)
            .with_max_iter(config.gmm_max_iter)
            .with_seed(config.random_seed)
            .fit_predict_proba(&reduced)?;

        Ok(select_clusters(nodes, &reduced, &probabilities, config))
    }
}

/// Number of mixture components for `n` nodes.
///
/// `max(2, min(round(sqrt(n / 2)), max_clusters, n / min_cluster_size))`, never above `n`.
pub fn estimate_cluster_count(n: usize, config: &ClusteringConfig) -> usize {
    let heuristic = (n as f64 / 2.0).sqrt().round() as usize;
    let by_size = n / config.min_cluster_size.max(1);
    heuristic
        .min(config.max_clusters)
        .min(by_size)
        .max(2)
        .min(n)
}

fn collect_embeddings(nodes: &[Node]) -> Option<Vec<Vec<f32>>> {
    let dimension = nodes.first()?.embedding.as_ref()?.len();
    if dimension == 0 {
        return None;
    }
    nodes
        .iter()
        .map(|node| match &node.embedding {
            Some(vector) if vector.len() == dimension => Some(vector.clone()),
            _ => None,
        })
        .collect()
}

/// Turn membership probabilities into clusters.
///
/// Returns an empty list when no component keeps `min_cluster_size` members.
fn select_clusters(
    nodes: &[Node],
    reduced: &[Vec<f64>],
    probabilities: &[Vec<f64>],
    config: &ClusteringConfig,
) -> Vec<Cluster> {
    let n = nodes.len();
    let components = probabilities.first().map_or(0, Vec::len);

    // (component, [(node index, probability)])
    let mut surviving: Vec<(usize, Vec<(usize, f64)>)> = Vec::new();
    for component in 0..components {
        let mut members: Vec<(usize, f64)> = (0..n)
            .filter_map(|i| {
                let p = probabilities[i][component];
                (p >= config.gmm_probability_threshold).then_some((i, p))
            })
            .collect();

        if members.len() < config.min_cluster_size {
            continue;
        }
        if members.len() > config.max_cluster_size {
            members.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            members.truncate(config.max_cluster_size);
            members.sort_by_key(|&(i, _)| i);
        }
        surviving.push((component, members));
    }

    if surviving.is_empty() {
        return Vec::new();
    }

    let mut assigned = vec![false; n];
    for (_, members) in &surviving {
        for &(i, _) in members {
            assigned[i] = true;
        }
    }

    // Centroids come from the admitted members, before orphans join.
    let centroids: Vec<Option<Vec<f64>>> = surviving
        .iter()
        .map(|(_, members)| centroid(reduced, members))
        .collect();

    for i in (0..n).filter(|&i| !assigned[i]) {
        let mut best = 0;
        let mut best_p = f64::NEG_INFINITY;
        for (slot, (component, _)) in surviving.iter().enumerate() {
            let p = probabilities[i][*component];
            if p > best_p {
                best = slot;
                best_p = p;
            }
        }
        let members = &mut surviving[best].1;
        members.push((i, best_p));
        members.sort_by_key(|&(index, _)| index);
    }

    surviving
        .into_iter()
        .zip(centroids)
        .enumerate()
        .map(|(cluster_id, ((_, members), centroid))| Cluster {
            cluster_id,
            member_ids: members.iter().map(|&(i, _)| nodes[i].id.clone()).collect(),
            probabilities: members.iter().map(|&(_, p)| p).collect(),
            members: members.into_iter().map(|(i, _)| i).collect(),
            centroid,
        })
        .collect()
}

fn centroid(reduced: &[Vec<f64>], members: &[(usize, f64)]) -> Option<Vec<f64>> {
    let first = reduced.get(members.first()?.0)?;
    let mut sum = vec![0.0; first.len()];
    for &(i, _) in members {
        for (acc, value) in sum.iter_mut().zip(&reduced[i]) {
            *acc += value;
        }
    }
    let count = members.len() as f64;
    Some(sum.into_iter().map(|value| value / count).collect())
}
