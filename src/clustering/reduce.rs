//! UMAP-style nonlinear dimensionality reduction.
//!
//! The reducer builds a fuzzy k-nearest-neighbour graph under cosine distance, lays the
//! points out with PCA, and then refines the layout with seeded stochastic gradient descent
//! that pulls graph neighbours together and pushes random pairs apart.

use super::ClusteringError;
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Curve parameters for `min_dist = 0.1`, `spread = 1.0`.
const CURVE_A: f64 = 1.577;
const CURVE_B: f64 = 0.8951;
const GRADIENT_CLIP: f64 = 4.0;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const SIGMA_SEARCH_STEPS: usize = 64;
const INITIAL_SPREAD: f64 = 10.0;

/// Seeded reducer from embedding space to a small target dimension.
#[derive(Debug, Clone)]
pub struct UmapReducer {
    n_components: usize,
    n_neighbors: usize,
    n_epochs: usize,
    seed: u64,
}

impl UmapReducer {
    /// Create a reducer targeting `n_components` dimensions.
    pub fn new(n_components: usize, n_neighbors: usize) -> Self {
        Self {
            n_components,
            n_neighbors,
            n_epochs: 200,
            seed: 0,
        }
    }

    /// Set the number of optimisation epochs.
    pub fn with_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs.max(1);
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Target dimension actually used for `n` points.
    pub fn target_dimension(&self, n: usize) -> usize {
        self.n_components.min(n.saturating_sub(2)).max(1)
    }

    /// Reduce `data` to `target_dimension(data.len())` dimensions.
    pub fn fit_transform(&self, data: &[Vec<f32>]) -> Result<Vec<Vec<f64>>, ClusteringError> {
        let n = data.len();
        if n < 2 {
            return Err(ClusteringError::EmptyInput);
        }
        let dim = data[0].len();
        if dim == 0 {
            return Err(ClusteringError::InvalidParameter {
                name: "embedding",
                message: "embeddings must not be empty",
            });
        }
        for point in data {
            if point.len() != dim {
                return Err(ClusteringError::DimensionMismatch {
                    expected: dim,
                    found: point.len(),
                });
            }
        }

        let target = self.target_dimension(n);
        let k = self.n_neighbors.min(n - 1).max(1);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let distances = cosine_distances(data);
        let graph = fuzzy_graph(&distances, k);
        let mut layout = pca_layout(data, target, &mut rng)?;
        self.optimize(&graph, &mut layout, &mut rng);

        if layout.iter().any(|row| row.iter().any(|value| !value.is_finite())) {
            return Err(ClusteringError::NonFinite("reduced embedding"));
        }
        Ok(layout)
    }

    fn optimize(&self, graph: &[(usize, usize, f64)], layout: &mut [Vec<f64>], rng: &mut StdRng) {
        if graph.is_empty() {
            return;
        }
        let n = layout.len();
        let max_weight = graph
            .iter()
            .map(|&(_, _, weight)| weight)
            .fold(0.0_f64, f64::max);

        let epochs_per_sample: Vec<f64> = graph
            .iter()
            .map(|&(_, _, weight)| {
                if weight > 0.0 {
                    max_weight / weight
                } else {
                    f64::INFINITY
                }
            })
            .collect();
        let epochs_per_negative: Vec<f64> = epochs_per_sample
            .iter()
            .map(|eps| eps / NEGATIVE_SAMPLE_RATE as f64)
            .collect();
        let mut next_sample = epochs_per_sample.clone();
        let mut next_negative = epochs_per_negative.clone();

        for epoch in 0..self.n_epochs {
            let alpha = 1.0 - epoch as f64 / self.n_epochs as f64;
            let now = epoch as f64;

            for (edge, &(head, tail, _)) in graph.iter().enumerate() {
                if next_sample[edge] > now {
                    continue;
                }

                let dist2 = squared_distance(&layout[head], &layout[tail]);
                let coeff = if dist2 > 0.0 {
                    (-2.0 * CURVE_A * CURVE_B * dist2.powf(CURVE_B - 1.0))
                        / (CURVE_A * dist2.powf(CURVE_B) + 1.0)
                } else {
                    0.0
                };
                for d in 0..layout[head].len() {
                    let grad = clip(coeff * (layout[head][d] - layout[tail][d])) * alpha;
                    layout[head][d] += grad;
                    layout[tail][d] -= grad;
                }
                next_sample[edge] += epochs_per_sample[edge];

                let negatives =
                    ((now - next_negative[edge]) / epochs_per_negative[edge]).max(0.0) as usize;
                for _ in 0..negatives {
                    let other = rng.random_range(0..n);
                    if other == head {
                        continue;
                    }
                    let dist2 = squared_distance(&layout[head], &layout[other]);
                    let coeff = if dist2 > 0.0 {
                        (2.0 * CURVE_B) / ((0.001 + dist2) * (CURVE_A * dist2.powf(CURVE_B) + 1.0))
                    } else {
                        0.0
                    };
                    for d in 0..layout[head].len() {
                        let grad = if coeff > 0.0 {
                            clip(coeff * (layout[head][d] - layout[other][d]))
                        } else {
                            GRADIENT_CLIP
                        };
                        layout[head][d] += grad * alpha;
                    }
                }
                next_negative[edge] += negatives as f64 * epochs_per_negative[edge];
            }
        }
    }
}

fn clip(value: f64) -> f64 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Pairwise cosine distances; zero vectors sit at distance 1 from everything.
fn cosine_distances(data: &[Vec<f32>]) -> Array2<f64> {
    let n = data.len();
    let norms: Vec<f64> = data
        .iter()
        .map(|row| row.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt())
        .collect();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let distance = if norms[i] > 0.0 && norms[j] > 0.0 {
                let dot: f64 = data[i]
                    .iter()
                    .zip(&data[j])
                    .map(|(&a, &b)| f64::from(a) * f64::from(b))
                    .sum();
                (1.0 - dot / (norms[i] * norms[j])).max(0.0)
            } else {
                1.0
            };
            distances[[i, j]] = distance;
            distances[[j, i]] = distance;
        }
    }
    distances
}

/// Symmetric fuzzy neighbour graph as a directed edge list (both directions present).
fn fuzzy_graph(distances: &Array2<f64>, k: usize) -> Vec<(usize, usize, f64)> {
    let n = distances.nrows();
    let target = (k as f64).log2();
    let mean_distance = {
        let total: f64 = distances.iter().sum();
        let pairs = (n * (n - 1)) as f64;
        if pairs > 0.0 { total / pairs } else { 0.0 }
    };
    let min_sigma = 1e-3 * mean_distance.max(1e-12);

    let mut weights = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let mut neighbours: Vec<usize> = (0..n).filter(|&j| j != i).collect();
        neighbours.sort_by(|&a, &b| {
            distances[[i, a]]
                .partial_cmp(&distances[[i, b]])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        neighbours.truncate(k);

        let knn: Vec<f64> = neighbours.iter().map(|&j| distances[[i, j]]).collect();
        let rho = knn.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
        let sigma = calibrate_sigma(&knn, rho, target).max(min_sigma);

        for (&j, &d) in neighbours.iter().zip(&knn) {
            weights[[i, j]] = (-(d - rho).max(0.0) / sigma).exp();
        }
    }

    let mut edges = Vec::new();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let a = weights[[i, j]];
            let b = weights[[j, i]];
            let w = a + b - a * b;
            if w > 0.0 {
                edges.push((i, j, w));
            }
        }
    }
    edges
}

/// Binary search for the bandwidth whose membership sum matches `target`.
fn calibrate_sigma(knn: &[f64], rho: f64, target: f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = f64::INFINITY;
    let mut mid = 1.0;

    for _ in 0..SIGMA_SEARCH_STEPS {
        let sum: f64 = knn
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 { (-gap / mid).exp() } else { 1.0 }
            })
            .sum();

        if (sum - target).abs() < 1e-5 {
            break;
        }
        if sum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid
}

/// Initial layout from the leading principal components of the centred data.
///
/// Components come from power iteration with deflation on the Gram matrix, which is
/// `n × n` and therefore small whenever there are fewer points than embedding dimensions.
fn pca_layout(
    data: &[Vec<f32>],
    target: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f64>>, ClusteringError> {
    let n = data.len();
    let dim = data[0].len();

    let mut centred = Array2::<f64>::zeros((n, dim));
    for j in 0..dim {
        let mean = data.iter().map(|row| f64::from(row[j])).sum::<f64>() / n as f64;
        for i in 0..n {
            centred[[i, j]] = f64::from(data[i][j]) - mean;
        }
    }
    let mut gram = centred.dot(&centred.t());

    let mut layout = vec![vec![0.0; target]; n];
    for component in 0..target {
        let mut vector: Vec<f64> = (0..n).map(|_| rng.random::<f64>() - 0.5).collect();
        normalize(&mut vector);

        let mut eigenvalue = 0.0;
        for _ in 0..100 {
            let mut next = vec![0.0; n];
            for i in 0..n {
                next[i] = (0..n).map(|j| gram[[i, j]] * vector[j]).sum();
            }
            eigenvalue = normalize(&mut next);
            if eigenvalue <= 1e-12 {
                break;
            }
            vector = next;
        }

        let scale = eigenvalue.max(0.0).sqrt();
        for i in 0..n {
            layout[i][component] = vector[i] * scale;
        }
        for i in 0..n {
            for j in 0..n {
                gram[[i, j]] -= eigenvalue * vector[i] * vector[j];
            }
        }
    }

    let max_abs = layout
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, value| acc.max(value.abs()));
    for row in &mut layout {
        for value in row.iter_mut() {
            if max_abs > 0.0 {
                *value *= INITIAL_SPREAD / max_abs;
            }
            // Jitter separates points that project onto the same spot.
            *value += (rng.random::<f64>() - 0.5) * 1e-4;
        }
    }

    if layout.iter().any(|row| row.iter().any(|value| !value.is_finite())) {
        return Err(ClusteringError::NonFinite("initial layout"));
    }
    Ok(layout)
}

fn normalize(vector: &mut [f64]) -> f64 {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    norm
}
