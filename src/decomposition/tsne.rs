// tsne.rs

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use super::{check_input, Decomposer};
use crate::error::{DecomposeError, Result};

/// Floor applied to joint probabilities in both spaces.
const MIN_PROBABILITY: f64 = 1e-12;
const MIN_GAIN: f64 = 0.01;
const OUTPUT_DIMS: usize = 2;

/// Exact t-SNE: Gaussian affinities calibrated to a perplexity, Student-t affinities in
/// two dimensions, gradient descent with momentum and per-coordinate gains.
#[derive(Clone, Debug)]
pub struct TSne {
    perplexity: f64,
    learning_rate: f64,
    momentum: f64,
    final_momentum: f64,
    n_iter: usize,
    early_exaggeration: f64,
    early_exaggeration_iter: usize,
    seed: u64,
    show_progress: bool,
}

impl Default for TSne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            learning_rate: 200.0,
            momentum: 0.5,
            final_momentum: 0.8,
            n_iter: 1000,
            early_exaggeration: 12.0,
            early_exaggeration_iter: 250,
            seed: 1,
            show_progress: false,
        }
    }
}

impl TSne {
    pub fn perplexity(mut self, p: f64) -> Self {
        self.perplexity = p;
        self
    }

    pub fn n_iter(mut self, n: usize) -> Self {
        self.n_iter = n;
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Perplexity usable for `n` points; large values are reduced so that each point
    /// has enough neighbours.
    fn effective_perplexity(&self, n: usize) -> f64 {
        let max = ((n - 1) as f64 / 3.0).max(1.0);
        if self.perplexity > max {
            warn!(
                "Perplexity {} is too large for {} samples, using {:.2}.",
                self.perplexity, n, max
            );
            max
        } else {
            self.perplexity
        }
    }

    /// Symmetric joint probabilities `P_ij = (p_j|i + p_i|j) / 2n`.
    fn joint_probabilities(&self, x: &Array2<f64>, perplexity: f64) -> Array2<f64> {
        let n = x.nrows();
        let d2 = squared_distances(x);
        let target_entropy = perplexity.ln();

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = d2.row(i).to_vec();
                conditional_row(&row, i, target_entropy)
            })
            .collect();

        Array2::from_shape_fn((n, n), |(i, j)| {
            ((rows[i][j] + rows[j][i]) / (2.0 * n as f64)).max(MIN_PROBABILITY)
        })
    }

    fn progress_bar(&self) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} t-SNE iterations ({percent}%) ETA: {eta}")
            .map_err(|e| DecomposeError::Decomposition {
                algorithm: "TSNE",
                reason: format!("failed to create progress bar style: {}", e),
            })?
            .progress_chars("=> ");
        Ok(ProgressBar::new(self.n_iter as u64).with_style(style))
    }
}

impl Decomposer for TSne {
    fn name(&self) -> &'static str {
        "TSNE"
    }

    fn fit_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_input(self.name(), x)?;
        let n = x.nrows();
        let perplexity = self.effective_perplexity(n);
        info!(
            "Running exact t-SNE on {}x{} matrix (perplexity={:.2}, iterations={}, seed={}).",
            n,
            x.ncols(),
            perplexity,
            self.n_iter,
            self.seed
        );
        let p = self.joint_probabilities(x, perplexity);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let init = Normal::new(0.0, 1e-4).map_err(|e| DecomposeError::Decomposition {
            algorithm: "TSNE",
            reason: e.to_string(),
        })?;
        let mut y: Array2<f64> = Array2::from_shape_fn((n, OUTPUT_DIMS), |_| init.sample(&mut rng));
        let mut update = Array2::<f64>::zeros((n, OUTPUT_DIMS));
        let mut gains = Array2::<f64>::ones((n, OUTPUT_DIMS));

        let pb = self.progress_bar()?;
        for iter in 0..self.n_iter {
            let exaggerating = iter < self.early_exaggeration_iter;
            let (exaggeration, momentum) = if exaggerating {
                (self.early_exaggeration, self.momentum)
            } else {
                (1.0, self.final_momentum)
            };

            let (grad, kl) = gradient(&p, &y, exaggeration);
            for ((g, u), gain) in grad.iter().zip(update.iter_mut()).zip(gains.iter_mut()) {
                *gain = if *u * g < 0.0 {
                    *gain + 0.2
                } else {
                    (*gain * 0.8).max(MIN_GAIN)
                };
                *u = momentum * *u - self.learning_rate * *gain * g;
            }
            y += &update;

            if (iter + 1) % 100 == 0 {
                debug!("t-SNE iteration {}: KL divergence {:.6}", iter + 1, kl);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if y.iter().any(|v| !v.is_finite()) {
            return Err(DecomposeError::Decomposition {
                algorithm: "TSNE",
                reason: "optimisation diverged".to_string(),
            });
        }
        Ok(y)
    }
}

fn squared_distances(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        x.row(i)
            .iter()
            .zip(x.row(j).iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    })
}

/// `p_j|i` for one point, with the Gaussian precision found by bisection so the row's
/// entropy matches `target_entropy`.
fn conditional_row(d2: &[f64], i: usize, target_entropy: f64) -> Vec<f64> {
    // Shifting by the nearest neighbour distance leaves the row unchanged after
    // normalisation and keeps exp() away from underflow.
    let d_min = d2
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &d)| d)
        .fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = d2.iter().map(|&d| d - d_min).collect();

    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut probs = vec![0.0; d2.len()];
    for _ in 0..100 {
        let mut sum = 0.0;
        for (j, p) in probs.iter_mut().enumerate() {
            *p = if j == i { 0.0 } else { (-shifted[j] * beta).exp() };
            sum += *p;
        }
        if sum == 0.0 {
            sum = 1e-8;
        }
        let weighted: f64 = probs.iter().zip(&shifted).map(|(p, d)| p * d).sum();
        let entropy = sum.ln() + beta * weighted / sum;
        for p in probs.iter_mut() {
            *p /= sum;
        }

        let diff = entropy - target_entropy;
        if diff.abs() <= 1e-5 {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
    probs
}

/// KL gradient `4 Σ_j (P_ij - Q_ij) (1 + |y_i - y_j|²)^-1 (y_i - y_j)` and the divergence.
fn gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> (Array2<f64>, f64) {
    let n = y.nrows();
    let num = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            0.0
        } else {
            let dx = y[[i, 0]] - y[[j, 0]];
            let dy = y[[i, 1]] - y[[j, 1]];
            1.0 / (1.0 + dx * dx + dy * dy)
        }
    });
    let q_sum = num.sum().max(MIN_PROBABILITY);

    let rows: Vec<([f64; OUTPUT_DIMS], f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut g = [0.0; OUTPUT_DIMS];
            let mut kl = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (num[[i, j]] / q_sum).max(MIN_PROBABILITY);
                let pij = p[[i, j]] * exaggeration;
                let coeff = 4.0 * (pij - q) * num[[i, j]];
                for (d, slot) in g.iter_mut().enumerate() {
                    *slot += coeff * (y[[i, d]] - y[[j, d]]);
                }
                kl += pij * (pij / q).ln();
            }
            (g, kl)
        })
        .collect();

    let mut grad = Array2::zeros((n, OUTPUT_DIMS));
    let mut kl = 0.0;
    for (i, (g, k)) in rows.into_iter().enumerate() {
        for (d, v) in g.into_iter().enumerate() {
            grad[[i, d]] = v;
        }
        kl += k;
    }
    (grad, kl)
}
