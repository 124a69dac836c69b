// ica.rs

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use super::pca::principal_scores;
use super::{check_input, effective_components, Decomposer};
use crate::error::Result;

/// Parallel FastICA with the logcosh contrast, run on PCA-whitened scores.
#[derive(Clone, Debug)]
pub struct FastIca {
    components: Option<usize>,
    seed: u64,
    max_iter: usize,
    tol: f64,
}

impl FastIca {
    pub fn new(components: Option<usize>, seed: u64) -> Self {
        Self {
            components,
            seed,
            max_iter: 200,
            tol: 1e-4,
        }
    }

    pub fn max_iter(mut self, n: usize) -> Self {
        self.max_iter = n;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }
}

impl Decomposer for FastIca {
    fn name(&self) -> &'static str {
        "ICA"
    }

    fn fit_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_input(self.name(), x)?;
        let k = effective_components(self.name(), self.components, x)?;
        let whitened = whiten(principal_scores(x, k, self.seed)?);
        let k = whitened.ncols();

        // Unmixing matrix, k x k.
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let init: Array2<f64> = Array2::from_shape_fn((k, k), |_| StandardNormal.sample(&mut rng));
        let mut w = symmetric_decorrelation(init);

        // Components as rows, samples as columns.
        let xt = whitened.t();
        let n = whitened.nrows() as f64;
        let mut converged = false;
        for iter in 0..self.max_iter {
            let wx = w.dot(&xt);
            let gwx = wx.mapv(f64::tanh);
            let g_prime: Array1<f64> = gwx
                .mapv(|v| 1.0 - v * v)
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(k));
            let update = gwx.dot(&whitened) / n - &(&w * &g_prime.insert_axis(Axis(1)));
            let w_next = symmetric_decorrelation(update);

            let lim = w_next
                .rows()
                .into_iter()
                .zip(w.rows())
                .map(|(a, b)| (a.dot(&b).abs() - 1.0).abs())
                .fold(0.0, f64::max);
            w = w_next;
            if lim < self.tol {
                debug!("FastICA converged after {} iterations (lim={:.2e}).", iter + 1, lim);
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "FastICA did not converge in {} iterations; consider a larger tolerance or more iterations.",
                self.max_iter
            );
        }
        info!("ICA extracted {} independent components.", k);

        Ok(whitened.dot(&w.t()))
    }
}

/// Scales each column to unit variance. Constant columns are left at zero.
fn whiten(mut scores: Array2<f64>) -> Array2<f64> {
    for mut col in scores.axis_iter_mut(Axis(1)) {
        let mean = col.mean().unwrap_or(0.0);
        col.mapv_inplace(|v| v - mean);
        let std = col.std(0.0);
        if std > 1e-12 {
            col.mapv_inplace(|v| v / std);
        } else {
            warn!("A principal component has zero variance and cannot be whitened.");
            col.fill(0.0);
        }
    }
    scores
}

/// Drives `w` towards `(w wᵀ)^(-1/2) w` by the iteration `w <- 1.5 w - 0.5 w wᵀ w`.
fn symmetric_decorrelation(w: Array2<f64>) -> Array2<f64> {
    let norm = w.dot(&w.t()).iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return w;
    }
    let mut w = w / norm.sqrt();
    for _ in 0..500 {
        let wwt = w.dot(&w.t());
        let off_identity = wwt
            .indexed_iter()
            .map(|((i, j), v)| if i == j { (v - 1.0).abs() } else { v.abs() })
            .fold(0.0, f64::max);
        if off_identity < 1e-12 {
            break;
        }
        w = &w * 1.5 - &(wwt.dot(&w) * 0.5);
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn mixed_signals() -> Array2<f64> {
        // Two independent sources mixed into three observed features.
        let n = 40;
        Array2::from_shape_fn((n, 3), |(i, j)| {
            let t = i as f64;
            let s1 = (t * 0.7).sin();
            let s2 = if i % 5 < 2 { 1.0 } else { -1.0 };
            match j {
                0 => s1 + 0.5 * s2,
                1 => 0.3 * s1 - s2,
                _ => 2.0 * s1 + 0.1 * s2 + 0.01 * t,
            }
        })
    }

    #[test]
    fn test_symmetric_decorrelation_is_orthogonal() {
        let w = symmetric_decorrelation(array![[2.0, 1.0], [0.5, 3.0]]);
        let wwt = w.dot(&w.t());
        assert_abs_diff_eq!(wwt[[0, 0]], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(wwt[[1, 1]], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(wwt[[0, 1]], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_ica_sources_are_white() {
        let s = FastIca::new(Some(2), 1).fit_transform(&mixed_signals()).unwrap();
        assert_eq!(s.dim(), (40, 2));
        let n = s.nrows() as f64;
        let cov = s.t().dot(&s) / n;
        assert_abs_diff_eq!(cov[[0, 0]], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(cov[[1, 1]], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(cov[[0, 1]], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_ica_is_deterministic_for_a_seed() {
        let a = FastIca::new(Some(2), 7).fit_transform(&mixed_signals()).unwrap();
        let b = FastIca::new(Some(2), 7).fit_transform(&mixed_signals()).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
        }
    }
}
