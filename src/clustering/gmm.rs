//! Diagonal-covariance Gaussian mixture fitted with EM.
//!
//! The mixture yields **soft** memberships: a chunk that spans two topics gets a
//! substantial probability under both components, which is what lets the cluster selection
//! admit it to more than one cluster.
//!
//! ```text
//! E-step: γₙₖ = πₖ N(xₙ | μₖ, σ²ₖ) / Σⱼ πⱼ N(xₙ | μⱼ, σ²ⱼ)
//! M-step: μₖ = Σₙ γₙₖ xₙ / Σₙ γₙₖ,  σ²ₖ = Σₙ γₙₖ (xₙ − μₖ)² / Σₙ γₙₖ + reg,  πₖ = Σₙ γₙₖ / N
//! ```

use super::ClusteringError;
use ndarray::{Array1, Array2, ArrayView1};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Gaussian mixture model with diagonal covariances.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    n_components: usize,
    max_iter: usize,
    tol: f64,
    reg_covar: f64,
    seed: u64,
}

impl GaussianMixture {
    /// Create a mixture with `n_components` components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
        }
    }

    /// Set maximum EM iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Set the random seed used to pick initial means.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit the mixture and return per-point membership probabilities.
    ///
    /// Entry `[i][c]` is the probability that point `i` belongs to component `c`; every row
    /// sums to one.
    pub fn fit_predict_proba(&self, data: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ClusteringError> {
        if data.is_empty() {
            return Err(ClusteringError::EmptyInput);
        }

        let n = data.len();
        let d = data[0].len();
        let k = self.n_components.min(n);

        if k == 0 {
            return Err(ClusteringError::InvalidParameter {
                name: "n_components",
                message: "must be > 0",
            });
        }

        let mut flat: Vec<f64> = Vec::with_capacity(n * d);
        for point in data {
            if point.len() != d {
                return Err(ClusteringError::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
            flat.extend(point);
        }
        let data_arr = Array2::from_shape_vec((n, d), flat)
            .map_err(|error| ClusteringError::Numeric(error.to_string()))?;

        // Means start at k distinct data points chosen by the seeded shuffle.
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rng);
        let mut means = Array2::zeros((k, d));
        for (c, &idx) in indices.iter().take(k).enumerate() {
            means.row_mut(c).assign(&data_arr.row(idx));
        }

        // Variances start at the global per-dimension variance.
        let global_mean = data_arr
            .mean_axis(ndarray::Axis(0))
            .ok_or(ClusteringError::EmptyInput)?;
        let mut variances = Array2::from_elem((k, d), self.reg_covar);
        for j in 0..d {
            let var = data_arr
                .column(j)
                .iter()
                .map(|value| (value - global_mean[j]).powi(2))
                .sum::<f64>()
                / n as f64;
            for c in 0..k {
                variances[[c, j]] = (var + self.reg_covar).max(self.reg_covar);
            }
        }

        let mut weights = Array1::from_elem(k, 1.0 / k as f64);
        let mut resp = Array2::zeros((n, k));
        let mut previous = f64::NEG_INFINITY;

        for _iter in 0..self.max_iter {
            let log_likelihood = e_step(&data_arr, &means, &variances, &weights, &mut resp);
            if !log_likelihood.is_finite() {
                return Err(ClusteringError::NonFinite("mixture log-likelihood"));
            }

            let resp_sum: Vec<f64> = (0..k).map(|c| resp.column(c).sum()).collect();
            let total: f64 = resp_sum.iter().sum();

            for c in 0..k {
                weights[c] = (resp_sum[c] / total).max(f64::MIN_POSITIVE);
            }

            let mut new_means = Array2::zeros((k, d));
            for c in 0..k {
                if resp_sum[c] > 1e-10 {
                    for i in 0..n {
                        for j in 0..d {
                            new_means[[c, j]] += resp[[i, c]] * data_arr[[i, j]];
                        }
                    }
                    for j in 0..d {
                        new_means[[c, j]] /= resp_sum[c];
                    }
                } else {
                    new_means.row_mut(c).assign(&means.row(c));
                }
            }

            let mut new_variances = Array2::from_elem((k, d), self.reg_covar);
            for c in 0..k {
                if resp_sum[c] > 1e-10 {
                    for i in 0..n {
                        for j in 0..d {
                            let diff = data_arr[[i, j]] - new_means[[c, j]];
                            new_variances[[c, j]] += resp[[i, c]] * diff * diff;
                        }
                    }
                    for j in 0..d {
                        new_variances[[c, j]] /= resp_sum[c];
                        new_variances[[c, j]] = new_variances[[c, j]].max(self.reg_covar);
                    }
                } else {
                    new_variances.row_mut(c).assign(&variances.row(c));
                }
            }

            means = new_means;
            variances = new_variances;

            if (log_likelihood - previous).abs() < self.tol {
                break;
            }
            previous = log_likelihood;
        }

        let final_likelihood = e_step(&data_arr, &means, &variances, &weights, &mut resp);
        if !final_likelihood.is_finite() {
            return Err(ClusteringError::NonFinite("mixture log-likelihood"));
        }

        Ok((0..n)
            .map(|i| (0..k).map(|c| resp[[i, c]]).collect())
            .collect())
    }
}

/// Fill `resp` with responsibilities and return the mean log-likelihood per point.
fn e_step(
    data: &Array2<f64>,
    means: &Array2<f64>,
    variances: &Array2<f64>,
    weights: &Array1<f64>,
    resp: &mut Array2<f64>,
) -> f64 {
    let n = data.nrows();
    let k = means.nrows();
    let mut total = 0.0;
    let mut log_probs = vec![0.0; k];

    for i in 0..n {
        let point = data.row(i);
        for c in 0..k {
            log_probs[c] =
                weights[c].ln() + log_gaussian(&point, &means.row(c), &variances.row(c));
        }
        let log_sum = logsumexp(&log_probs);
        total += log_sum;
        for c in 0..k {
            resp[[i, c]] = (log_probs[c] - log_sum).exp();
        }
    }

    total / n as f64
}

fn log_gaussian(point: &ArrayView1<'_, f64>, mean: &ArrayView1<'_, f64>, var: &ArrayView1<'_, f64>) -> f64 {
    let d = point.len() as f64;
    let mut log_prob = -0.5 * d * (2.0 * std::f64::consts::PI).ln();

    for i in 0..point.len() {
        let diff = point[i] - mean[i];
        log_prob -= 0.5 * var[i].ln();
        log_prob -= 0.5 * diff * diff / var[i];
    }

    log_prob
}

fn logsumexp(values: &[f64]) -> f64 {
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argmax(row: &[f64]) -> usize {
        row.iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    #[test]
    fn separates_two_blobs() {
        let data = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![0.05, 0.0],
            vec![10.0, 10.0],
            vec![10.1, 10.1],
            vec![10.0, 10.05],
        ];

        let probs = GaussianMixture::new(2)
            .with_seed(42)
            .fit_predict_proba(&data)
            .unwrap();
        let labels: Vec<usize> = probs.iter().map(|row| argmax(row)).collect();

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn rows_are_probability_distributions() {
        let data = vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![10.0, 10.0]];

        let probs = GaussianMixture::new(2)
            .with_seed(7)
            .fit_predict_proba(&data)
            .unwrap();

        for row in &probs {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_memberships() {
        let data: Vec<Vec<f64>> = (0..12)
            .map(|i| vec![(i % 4) as f64 * 3.0, (i / 4) as f64])
            .collect();
        let first = GaussianMixture::new(3).with_seed(224).fit_predict_proba(&data).unwrap();
        let second = GaussianMixture::new(3).with_seed(224).fit_predict_proba(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_ragged_input() {
        let data = vec![vec![0.0, 0.0], vec![1.0]];
        let error = GaussianMixture::new(2).fit_predict_proba(&data).unwrap_err();
        assert!(matches!(error, ClusteringError::DimensionMismatch { expected: 2, found: 1 }));
    }
}
