// pca.rs

use efficient_pca::PCA as EfficientPcaModel;
use log::{info, warn};
use ndarray::{Array2, Axis};

use super::{check_input, effective_components, Decomposer};
use crate::error::{DecomposeError, Result};

const N_OVERSAMPLES: usize = 10;

/// Randomized PCA through `efficient_pca`.
#[derive(Clone, Debug)]
pub struct Pca {
    components: Option<usize>,
    seed: u64,
}

impl Pca {
    pub fn new(components: Option<usize>, seed: u64) -> Self {
        Self { components, seed }
    }
}

impl Decomposer for Pca {
    fn name(&self) -> &'static str {
        "PCA"
    }

    fn fit_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_input(self.name(), x)?;
        let k = effective_components(self.name(), self.components, x)?;
        let scores = principal_scores(x, k, self.seed)?;
        let variances: Vec<String> = scores
            .axis_iter(Axis(1))
            .map(|pc| format!("{:.4}", pc.var(0.0)))
            .collect();
        info!("PCA component variances: [{}]", variances.join(", "));
        Ok(scores)
    }
}

/// Fits `k` principal components of `x` (samples x features) and returns the scores.
pub(crate) fn principal_scores(x: &Array2<f64>, k: usize, seed: u64) -> Result<Array2<f64>> {
    let mut model = EfficientPcaModel::new();
    info!(
        "Running efficient_pca rfit: k={}, oversamples={}, seed={}, on {}x{} matrix",
        k,
        N_OVERSAMPLES,
        seed,
        x.nrows(),
        x.ncols()
    );
    // rfit consumes its input
    model
        .rfit(x.clone(), k, N_OVERSAMPLES, Some(seed), None)
        .map_err(pca_error)?;

    let computed_k = model.rotation().map_or(0, |r| r.ncols());
    if computed_k == 0 {
        return Err(DecomposeError::Decomposition {
            algorithm: "PCA",
            reason: format!("model resulted in 0 components despite requesting {}", k),
        });
    } else if computed_k < k {
        warn!("PCA model computed {} components (requested {}).", computed_k, k);
    }

    model.transform(x.clone()).map_err(pca_error)
}

fn pca_error<E: std::fmt::Display>(e: E) -> DecomposeError {
    DecomposeError::Decomposition {
        algorithm: "PCA",
        reason: e.to_string(),
    }
}
