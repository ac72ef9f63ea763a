// ============================================================
// Layer 5 — Embedding Cluster Model
// ============================================================
// A Gaussian mixture with diagonal covariances, fitted once on
// the embeddings collected during the final training epoch.
//
//   1. k-means++ seeding (fixed seed) + a few Lloyd iterations
//   2. hard assignment → first M-step (weights, means, variances)
//   3. EM until the mean log-likelihood gain < 1e-3
//      or 100 iterations
//
// Every variance gets a floor of 1e-6 so a component collapsing
// onto a single point cannot produce an infinite density.
// All densities are handled in log space (log-sum-exp).

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{f64::consts::PI, fs, path::Path};

use crate::domain::error::PipelineError;
use crate::domain::traits::Persistable;

pub const DEFAULT_COMPONENTS: usize = 5;

/// Fewer rows than `components × MIN_ROWS_PER_COMPONENT` is refused
pub const MIN_ROWS_PER_COMPONENT: usize = 2;

const VARIANCE_FLOOR: f64 = 1e-6;
const TOLERANCE: f64 = 1e-3;
const MAX_ITERATIONS: usize = 100;
const LLOYD_ITERATIONS: usize = 10;

// ─── ClusterFitter ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ClusterFitter {
    components: usize,
    seed: u64,
}

impl ClusterFitter {
    pub fn new(components: usize, seed: u64) -> Result<Self, PipelineError> {
        if components == 0 {
            return Err(PipelineError::Configuration(
                "cluster model needs at least one component".into(),
            ));
        }
        Ok(Self { components, seed })
    }

    pub fn min_rows(&self) -> usize {
        self.components * MIN_ROWS_PER_COMPONENT
    }

    /// data: [rows, dim] — one embedding per row
    pub fn fit(&self, data: ArrayView2<f64>) -> Result<GaussianMixture, PipelineError> {
        let (rows, dim) = data.dim();
        if rows < self.min_rows() {
            return Err(PipelineError::InsufficientData(format!(
                "{} embeddings collected, a {}-component mixture needs at least {}",
                rows,
                self.components,
                self.min_rows()
            )));
        }
        if dim == 0 {
            return Err(PipelineError::DataIntegrity("embeddings have zero width".into()));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::DataIntegrity("embeddings contain NaN or infinite values".into()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers = self.seed_centers(data, &mut rng);
        let assignment = lloyd(data, centers);

        let mut resp = Array2::<f64>::zeros((rows, self.components));
        for (i, &c) in assignment.iter().enumerate() {
            resp[[i, c]] = 1.0;
        }
        let mut model = GaussianMixture::from_responsibilities(data, resp.view());

        let mut previous = f64::NEG_INFINITY;
        for iteration in 1..=MAX_ITERATIONS {
            let (resp, mean_ll) = model.e_step(data);
            model = GaussianMixture::from_responsibilities(data, resp.view());
            model.iterations = iteration;
            model.lower_bound = mean_ll;

            if (mean_ll - previous).abs() < TOLERANCE {
                model.converged = true;
                break;
            }
            previous = mean_ll;
        }

        if model.converged {
            tracing::debug!(
                "Mixture converged after {} EM iterations (mean log-likelihood {:.4})",
                model.iterations,
                model.lower_bound
            );
        } else {
            tracing::warn!("Mixture did not converge within {} EM iterations", MAX_ITERATIONS);
        }
        Ok(model)
    }

    /// k-means++: the first centre is uniform, each next one is drawn
    /// with probability proportional to its squared distance to the
    /// nearest centre chosen so far.
    fn seed_centers(&self, data: ArrayView2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let rows = data.nrows();
        let mut centers = Array2::<f64>::zeros((self.components, data.ncols()));
        centers.row_mut(0).assign(&data.row(rng.gen_range(0..rows)));

        let mut nearest: Vec<f64> = data
            .outer_iter()
            .map(|x| squared_distance(x, centers.row(0)))
            .collect();

        for c in 1..self.components {
            let total: f64 = nearest.iter().sum();
            let pick = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                nearest
                    .iter()
                    .position(|&d| {
                        target -= d;
                        target <= 0.0
                    })
                    .unwrap_or(rows - 1)
            } else {
                rng.gen_range(0..rows)
            };
            centers.row_mut(c).assign(&data.row(pick));

            for (d, x) in nearest.iter_mut().zip(data.outer_iter()) {
                *d = d.min(squared_distance(x, centers.row(c)));
            }
        }
        centers
    }
}

/// Refine the seeded centres; returns the nearest-centre index per row.
fn lloyd(data: ArrayView2<f64>, mut centers: Array2<f64>) -> Vec<usize> {
    let mut assignment = nearest_centers(data, centers.view());

    for _ in 0..LLOYD_ITERATIONS {
        let mut sums = Array2::<f64>::zeros(centers.dim());
        let mut counts = vec![0usize; centers.nrows()];
        for (x, &c) in data.outer_iter().zip(&assignment) {
            sums.row_mut(c).scaled_add(1.0, &x);
            counts[c] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            // an empty cluster keeps its previous centre
            if count > 0 {
                let mean = sums.row(c).mapv(|v| v / count as f64);
                centers.row_mut(c).assign(&mean);
            }
        }

        let next = nearest_centers(data, centers.view());
        if next == assignment {
            break;
        }
        assignment = next;
    }
    assignment
}

fn nearest_centers(data: ArrayView2<f64>, centers: ArrayView2<f64>) -> Vec<usize> {
    data.outer_iter()
        .map(|x| {
            centers
                .outer_iter()
                .map(|c| squared_distance(x, c))
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
                .0
        })
        .collect()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn log_sum_exp(row: ArrayView1<f64>) -> f64 {
    let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !max.is_finite() {
        return max;
    }
    max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

// ─── GaussianMixture ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    /// Mixing weights — shape: [components], sums to 1
    pub weights: Array1<f64>,
    /// shape: [components, dim]
    pub means: Array2<f64>,
    /// Diagonal covariances — shape: [components, dim]
    pub variances: Array2<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Mean per-row log-likelihood at the last EM iteration
    pub lower_bound: f64,
}

impl GaussianMixture {
    pub fn components(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    /// M-step: weights, means and floored variances from soft assignments.
    fn from_responsibilities(data: ArrayView2<f64>, resp: ArrayView2<f64>) -> Self {
        let rows = data.nrows() as f64;
        let components = resp.ncols();
        let nk = resp.sum_axis(Axis(0)).mapv(|v| v + 10.0 * f64::EPSILON);

        let mut means = resp.t().dot(&data);
        for (mut row, &n) in means.outer_iter_mut().zip(nk.iter()) {
            row /= n;
        }

        let mut variances = Array2::<f64>::zeros((components, data.ncols()));
        for c in 0..components {
            let mean = means.row(c);
            let mut acc = variances.row_mut(c);
            for (x, &r) in data.outer_iter().zip(resp.column(c).iter()) {
                for ((a, &xv), &m) in acc.iter_mut().zip(x.iter()).zip(mean.iter()) {
                    *a += r * (xv - m).powi(2);
                }
            }
            acc.mapv_inplace(|v| v / nk[c] + VARIANCE_FLOOR);
        }

        Self {
            weights: nk.mapv(|n| n / rows),
            means,
            variances,
            converged: false,
            iterations: 0,
            lower_bound: f64::NEG_INFINITY,
        }
    }

    /// log(weight_k) + log N(x | mean_k, diag(var_k)) — shape: [rows, components]
    fn weighted_log_prob(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((data.nrows(), self.components()));
        for c in 0..self.components() {
            let mean = self.means.row(c);
            let var = self.variances.row(c);
            let log_norm: f64 = var.iter().map(|v| (2.0 * PI * v).ln()).sum();
            let log_weight = self.weights[c].ln();

            for (i, x) in data.outer_iter().enumerate() {
                let mahalanobis: f64 = x
                    .iter()
                    .zip(mean.iter())
                    .zip(var.iter())
                    .map(|((x, m), v)| (x - m).powi(2) / v)
                    .sum();
                out[[i, c]] = log_weight - 0.5 * (log_norm + mahalanobis);
            }
        }
        out
    }

    /// E-step: (responsibilities, mean log-likelihood)
    fn e_step(&self, data: ArrayView2<f64>) -> (Array2<f64>, f64) {
        let mut log_resp = self.weighted_log_prob(data);
        let mut total = 0.0;
        for mut row in log_resp.outer_iter_mut() {
            let norm = log_sum_exp(row.view());
            total += norm;
            row.mapv_inplace(|v| (v - norm).exp());
        }
        (log_resp, total / data.nrows().max(1) as f64)
    }

    fn check_dim(&self, data: ArrayView2<f64>) -> Result<(), PipelineError> {
        if data.ncols() != self.dim() {
            return Err(PipelineError::DataIntegrity(format!(
                "cluster model expects {}-wide rows, got {}",
                self.dim(),
                data.ncols()
            )));
        }
        Ok(())
    }

    /// Posterior component probabilities — shape: [rows, components]
    pub fn predict_proba(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, PipelineError> {
        self.check_dim(data)?;
        Ok(self.e_step(data).0)
    }

    /// Most probable component per row
    pub fn predict(&self, data: ArrayView2<f64>) -> Result<Vec<usize>, PipelineError> {
        self.check_dim(data)?;
        let scores = self.weighted_log_prob(data);
        Ok(scores
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
                    .0
            })
            .collect())
    }

    pub fn mean_log_likelihood(&self, data: ArrayView2<f64>) -> Result<f64, PipelineError> {
        self.check_dim(data)?;
        Ok(self.e_step(data).1)
    }
}

impl Persistable for GaussianMixture {
    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Cannot write cluster model to '{}'", path.display()))?;
        tracing::debug!("Saved {}-component cluster model to '{}'", self.components(), path.display());
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read cluster model from '{}'", path.display()))?;
        let model: Self = serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid cluster model", path.display()))?;
        if model.means.dim() != model.variances.dim() || model.means.nrows() != model.weights.len() {
            return Err(PipelineError::DataIntegrity(format!(
                "cluster model '{}' has inconsistent shapes",
                path.display()
            ))
            .into());
        }
        Ok(model)
    }
}
