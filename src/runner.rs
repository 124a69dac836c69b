//! The end-to-end pipeline behind the `decompose` binary.
//!
//! Load → color → subset → rpkm → cutoff → log2 → fit → write. Each stage can leave its
//! table next to the output when intermediates are kept.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;

use crate::coloring::{ColoringStrategy, ConditionsTable};
use crate::decomposition::{Algorithm, DecomposerParams};
use crate::error::Result;
use crate::experiment::Experiment;
use crate::render::{ImageFormat, Plotter, RenderContext};
use crate::table::{read_id_list, ExpressionTable, TableFormat};

/// Pseudocount added before the log2 stage.
pub const LOG2_PSEUDOCOUNT: f64 = 1.0;

/// Everything one run needs; built from CLI flags by the binary.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub input: PathBuf,
    /// Figure path; its extension-less form is the prefix of every other output.
    pub output: PathBuf,
    pub format: TableFormat,
    pub lengths: Option<PathBuf>,
    pub rpkm: bool,
    pub log2: bool,
    /// Rows summing below this are dropped; 0 disables the stage.
    pub sum_cutoff: f64,
    pub gene: Option<String>,
    pub subset: Option<PathBuf>,
    pub conditions: Option<PathBuf>,
    pub conditions_col: Option<String>,
    pub algorithm: Algorithm,
    pub keep_intermediates: bool,
    pub interactive: bool,
    pub params: DecomposerParams,
    pub render: RenderContext,
}

impl RunConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            format: TableFormat::Matrix,
            lengths: None,
            rpkm: false,
            log2: false,
            sum_cutoff: 0.0,
            gene: None,
            subset: None,
            conditions: None,
            conditions_col: None,
            algorithm: Algorithm::Pca,
            keep_intermediates: false,
            interactive: false,
            params: DecomposerParams::default(),
            render: RenderContext::default(),
        }
    }

    /// The output path without its extension.
    pub fn prefix(&self) -> PathBuf {
        self.output.with_extension("")
    }

    /// `<prefix>.<suffix>`
    pub fn derived_path(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix().into_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Paths written by [`run`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutputs {
    pub figure: PathBuf,
    pub components: PathBuf,
    pub interactive: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub intermediates: Vec<PathBuf>,
}

pub fn run(config: &RunConfig) -> Result<RunOutputs> {
    let start = Instant::now();
    // Reject an unusable figure path before reading anything.
    ImageFormat::from_path(&config.output)?;

    // --- 1. Load ---
    let table = ExpressionTable::load(&config.input, config.format, config.lengths.as_deref())?;

    // --- 2. Coloring ---
    let conditions = match &config.conditions {
        Some(path) => Some(ConditionsTable::load(path)?),
        None => None,
    };
    if conditions.is_some() && config.conditions_col.is_none() {
        info!("A conditions table was given without a column to color by; ignoring it.");
    }
    let strategy =
        ColoringStrategy::select(conditions, config.conditions_col.clone(), config.gene.clone());
    let mut experiment = Experiment::new(table, strategy);

    // --- 3. Transforms ---
    // Kept stages are held until the fit succeeds so a failed run writes nothing.
    let mut stages: Vec<(&'static str, ExpressionTable)> = Vec::new();
    if let Some(path) = &config.subset {
        let ids = read_id_list(path)?;
        experiment.counts_mut().subset(&ids);
        keep_stage(config, &experiment, "subset.txt", &mut stages);
    }
    if config.rpkm {
        experiment.counts_mut().as_rpkm()?;
        keep_stage(config, &experiment, "rpkm.txt", &mut stages);
    }
    if config.sum_cutoff > 0.0 {
        experiment.counts_mut().min_row_sum_cutoff(config.sum_cutoff);
        keep_stage(config, &experiment, "cutoff.txt", &mut stages);
    }
    if config.log2 {
        experiment.counts_mut().as_log2(LOG2_PSEUDOCOUNT)?;
        keep_stage(config, &experiment, "log2.txt", &mut stages);
    }

    // --- 4. Decomposition ---
    let plotter = Plotter::fit(
        experiment,
        config.algorithm,
        &config.params,
        config.render.clone(),
    )?;

    // --- 5. Outputs ---
    let mut outputs = RunOutputs::default();
    for (suffix, table) in &stages {
        let path = config.derived_path(suffix);
        write_stage(table, &path)?;
        outputs.intermediates.push(path);
    }
    if config.keep_intermediates {
        let path = config.derived_path("metadata.txt");
        plotter.experiment().write_metadata(&path)?;
        outputs.metadata = Some(path);
    }
    let components = config.derived_path(config.algorithm.component_suffix());
    plotter.embedding().write_tsv(&components)?;
    outputs.components = components;

    plotter.render(&config.output)?;
    outputs.figure = config.output.clone();

    if config.interactive {
        let path = config.derived_path("html");
        plotter.render_interactive(&path)?;
        outputs.interactive = Some(path);
    }

    info!("decompose finished in {:.2?}.", start.elapsed());
    Ok(outputs)
}

fn keep_stage(
    config: &RunConfig,
    experiment: &Experiment,
    suffix: &'static str,
    stages: &mut Vec<(&'static str, ExpressionTable)>,
) {
    if config.keep_intermediates {
        stages.push((suffix, experiment.counts().clone()));
    }
}

fn write_stage(table: &ExpressionTable, path: &Path) -> Result<()> {
    table.write_tsv(path)?;
    info!("Kept intermediate table {}.", path.display());
    Ok(())
}
