//! Normalize gene-expression count tables, reduce the samples with PCA, ICA or t-SNE,
//! and plot the embedding colored by condition or by one gene's expression.
//!
//! ```no_run
//! use decompose::{run, Algorithm, RunConfig};
//!
//! let mut config = RunConfig::new("counts.txt", "samples.svg");
//! config.log2 = true;
//! config.sum_cutoff = 10.0;
//! config.algorithm = Algorithm::Pca;
//! let outputs = run(&config)?;
//! println!("components in {}", outputs.components.display());
//! # Ok::<(), decompose::DecomposeError>(())
//! ```

pub mod coloring;
pub mod decomposition;
pub mod error;
pub mod experiment;
pub mod render;
pub mod runner;
pub mod table;

pub use coloring::{
    from_conditions, from_gene_expression, from_nothing, to_hex, ColorValue, ColoringStrategy,
    Colormap, ConditionsTable, HexScale, Metadata, MetadataRow,
};
pub use decomposition::{Algorithm, Decomposer, DecomposerParams, Embedding, FastIca, Pca, TSne};
pub use error::{DecomposeError, Result};
pub use experiment::Experiment;
pub use render::{ImageFormat, Plotter, RenderContext};
pub use runner::{run, RunConfig, RunOutputs};
pub use table::{read_id_list, read_lengths_file, ExpressionTable, TableFormat, Transform};
