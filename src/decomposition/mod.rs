//! Dimensionality reduction of the sample x feature matrix.
//!
//! Each algorithm implements [`Decomposer`]; [`Algorithm`] picks one by name and
//! [`Embedding`] carries the result indexed by sample id.

pub mod ica;
pub mod pca;
pub mod tsne;

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use log::info;
use ndarray::{Array2, ArrayView1};

use crate::error::{DecomposeError, Result};

pub use ica::FastIca;
pub use pca::Pca;
pub use tsne::TSne;

/// A fit-transform routine over a samples x features matrix.
pub trait Decomposer {
    fn name(&self) -> &'static str;

    /// Returns a samples x components embedding, rows in input order.
    fn fit_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Pca,
    Tsne,
    Ica,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Pca => "PCA",
            Algorithm::Tsne => "TSNE",
            Algorithm::Ica => "ICA",
        }
    }

    /// Suffix of the component table written next to the figure.
    pub fn component_suffix(self) -> &'static str {
        match self {
            Algorithm::Pca => "pcacomp.txt",
            Algorithm::Tsne => "tsnecomp.txt",
            Algorithm::Ica => "icacomp.txt",
        }
    }

    pub fn decomposer(self, params: &DecomposerParams) -> Box<dyn Decomposer + Send + Sync> {
        match self {
            Algorithm::Pca => Box::new(Pca::new(params.components, params.seed)),
            Algorithm::Ica => Box::new(FastIca::new(params.components, params.seed)),
            Algorithm::Tsne => Box::new(
                TSne::default()
                    .perplexity(params.perplexity)
                    .seed(params.seed)
                    .show_progress(params.show_progress),
            ),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = DecomposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PCA" => Ok(Algorithm::Pca),
            "TSNE" | "T-SNE" => Ok(Algorithm::Tsne),
            "ICA" => Ok(Algorithm::Ica),
            _ => Err(DecomposeError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Knobs shared by the decomposers. `components: None` means as many as the data allows
/// (t-SNE always embeds in two dimensions).
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposerParams {
    pub components: Option<usize>,
    pub seed: u64,
    pub perplexity: f64,
    pub show_progress: bool,
}

impl Default for DecomposerParams {
    fn default() -> Self {
        Self {
            components: None,
            seed: 1,
            perplexity: 30.0,
            show_progress: false,
        }
    }
}

/// Rejects matrices no decomposition can run on.
pub(crate) fn check_input(algorithm: &'static str, x: &Array2<f64>) -> Result<()> {
    if x.nrows() < 2 {
        return Err(DecomposeError::Decomposition {
            algorithm,
            reason: format!("needs at least 2 samples, found {}", x.nrows()),
        });
    }
    if x.ncols() == 0 {
        return Err(DecomposeError::Decomposition {
            algorithm,
            reason: "needs at least 1 feature, found 0".to_string(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(DecomposeError::Decomposition {
            algorithm,
            reason: "input contains NaN or infinite values".to_string(),
        });
    }
    Ok(())
}

/// Components requested, capped at `min(n_samples, n_features)`.
pub(crate) fn effective_components(
    algorithm: &'static str,
    requested: Option<usize>,
    x: &Array2<f64>,
) -> Result<usize> {
    let max_k = x.nrows().min(x.ncols());
    match requested {
        Some(0) => Err(DecomposeError::Decomposition {
            algorithm,
            reason: "number of components must be > 0".to_string(),
        }),
        Some(k) if k > max_k => {
            log::warn!(
                "Requested {} components exceeds max possible ({}), adjusting to {}.",
                k, max_k, max_k
            );
            Ok(max_k)
        }
        Some(k) => Ok(k),
        None => Ok(max_k),
    }
}

/// Low-dimensional coordinates, one row per sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding {
    algorithm: Algorithm,
    sample_ids: Vec<String>,
    coords: Array2<f64>,
}

impl Embedding {
    pub fn new(algorithm: Algorithm, sample_ids: Vec<String>, coords: Array2<f64>) -> Result<Self> {
        if sample_ids.len() != coords.nrows() {
            return Err(DecomposeError::Decomposition {
                algorithm: algorithm.name(),
                reason: format!(
                    "embedding has {} rows for {} samples",
                    coords.nrows(),
                    sample_ids.len()
                ),
            });
        }
        Ok(Self {
            algorithm,
            sample_ids,
            coords,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn coords(&self) -> &Array2<f64> {
        &self.coords
    }

    pub fn n_components(&self) -> usize {
        self.coords.ncols()
    }

    pub fn sample(&self, sample_id: &str) -> Option<ArrayView1<'_, f64>> {
        let i = self.sample_ids.iter().position(|s| s == sample_id)?;
        Some(self.coords.row(i))
    }

    /// First two components of each sample; a missing second component reads as 0.
    pub fn xy(&self) -> Vec<(f64, f64)> {
        self.coords
            .rows()
            .into_iter()
            .map(|row| {
                let x = row.get(0).copied().unwrap_or(0.0);
                let y = row.get(1).copied().unwrap_or(0.0);
                (x, y)
            })
            .collect()
    }

    /// Header `\t0\t1...`, then one row per sample.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for c in 0..self.n_components() {
            write!(writer, "\t{}", c)?;
        }
        writeln!(writer)?;
        for (sample, row) in self.sample_ids.iter().zip(self.coords.rows()) {
            write!(writer, "{}", sample)?;
            for v in row {
                write!(writer, "\t{}", v)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        info!(
            "Wrote {} {} component(s) for {} samples to {}.",
            self.n_components(),
            self.algorithm,
            self.sample_ids.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("PCA".parse::<Algorithm>().unwrap(), Algorithm::Pca);
        assert_eq!("tsne".parse::<Algorithm>().unwrap(), Algorithm::Tsne);
        assert_eq!("Ica".parse::<Algorithm>().unwrap(), Algorithm::Ica);
        assert!(matches!(
            "umap".parse::<Algorithm>(),
            Err(DecomposeError::UnknownAlgorithm(name)) if name == "umap"
        ));
    }

    #[test]
    fn test_component_suffix() {
        assert_eq!(Algorithm::Pca.component_suffix(), "pcacomp.txt");
        assert_eq!(Algorithm::Tsne.component_suffix(), "tsnecomp.txt");
        assert_eq!(Algorithm::Ica.component_suffix(), "icacomp.txt");
    }

    #[test]
    fn test_effective_components() {
        let x = Array2::<f64>::zeros((4, 3));
        assert_eq!(effective_components("PCA", None, &x).unwrap(), 3);
        assert_eq!(effective_components("PCA", Some(2), &x).unwrap(), 2);
        assert_eq!(effective_components("PCA", Some(10), &x).unwrap(), 3);
        assert!(effective_components("PCA", Some(0), &x).is_err());
    }

    #[test]
    fn test_check_input() {
        assert!(check_input("PCA", &array![[1.0, 2.0]]).is_err());
        assert!(check_input("PCA", &Array2::<f64>::zeros((3, 0))).is_err());
        assert!(check_input("PCA", &array![[1.0], [f64::NAN]]).is_err());
        assert!(check_input("PCA", &array![[1.0], [2.0]]).is_ok());
    }

    #[test]
    fn test_embedding_write_tsv() {
        let emb = Embedding::new(
            Algorithm::Pca,
            vec!["A".to_string(), "B".to_string()],
            array![[1.5, -2.0], [0.0, 3.25]],
        )
        .unwrap();
        let file = NamedTempFile::new().unwrap();
        emb.write_tsv(file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, "\t0\t1\nA\t1.5\t-2\nB\t0\t3.25\n");
    }

    #[test]
    fn test_embedding_shape_mismatch() {
        assert!(Embedding::new(Algorithm::Ica, vec!["A".to_string()], array![[1.0], [2.0]]).is_err());
    }

    #[test]
    fn test_xy_pads_single_component() {
        let emb = Embedding::new(
            Algorithm::Pca,
            vec!["A".to_string(), "B".to_string()],
            array![[1.0], [2.0]],
        )
        .unwrap();
        assert_eq!(emb.xy(), vec![(1.0, 0.0), (2.0, 0.0)]);
    }
}
