//! An expression table paired with the per-sample metadata used to color it.

use std::path::Path;

use log::info;

use crate::coloring::{from_gene_expression, ColoringStrategy, Colormap, HexScale, Metadata};
use crate::error::Result;
use crate::table::ExpressionTable;

/// Owns one [`ExpressionTable`] and the [`Metadata`] derived for its samples.
///
/// Metadata always has exactly one row per sample of the table. Transforms on the
/// table only ever drop features, so the sample set is fixed once constructed.
#[derive(Clone, Debug)]
pub struct Experiment {
    counts: ExpressionTable,
    strategy: ColoringStrategy,
    metadata: Metadata,
}

impl Experiment {
    pub fn new(counts: ExpressionTable, strategy: ColoringStrategy) -> Self {
        let metadata = strategy.metadata(&counts);
        info!(
            "Experiment over {} samples colored {}.",
            counts.n_samples(),
            describe(&strategy)
        );
        Self {
            counts,
            strategy,
            metadata,
        }
    }

    pub fn counts(&self) -> &ExpressionTable {
        &self.counts
    }

    /// Mutable access for the feature transforms (subset, cutoff, log2, rpkm).
    pub fn counts_mut(&mut self) -> &mut ExpressionTable {
        &mut self.counts
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn strategy(&self) -> &ColoringStrategy {
        &self.strategy
    }

    /// Re-derives metadata from `gene_id`'s expression in the current table.
    /// A gene absent from the table yields the default coloring.
    pub fn recolor(&mut self, gene_id: &str) {
        self.metadata = from_gene_expression(&self.counts, gene_id);
        self.strategy = ColoringStrategy::ByGeneExpression {
            gene_id: gene_id.to_string(),
        };
    }

    pub fn assign_hex(&mut self, colormap: Colormap, scale: HexScale) {
        self.metadata.assign_hex(colormap, scale);
    }

    pub fn write_metadata(&self, path: &Path) -> Result<()> {
        self.metadata.write_tsv(path)?;
        info!("Wrote sample metadata to {}.", path.display());
        Ok(())
    }
}

fn describe(strategy: &ColoringStrategy) -> String {
    match strategy {
        ColoringStrategy::ByCondition { column, .. } => format!("by condition column '{}'", column),
        ColoringStrategy::ByGeneExpression { gene_id } => format!("by expression of '{}'", gene_id),
        ColoringStrategy::Default => "uniformly".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coloring::{ColorValue, ConditionsTable, DEFAULT_CONDITION, EXPRESSION_CONDITION};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeSet;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> ExpressionTable {
        ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2", "g3"]),
            ids(&["A", "B"]),
            array![[5.0, 1.0], [0.0, 0.0], [2.0, 8.0]],
            None,
        )
        .unwrap()
    }

    fn covers_samples(exp: &Experiment) -> bool {
        let md: BTreeSet<&str> = exp.metadata().samples().collect();
        let counts: BTreeSet<&str> = exp.counts().sample_ids().iter().map(String::as_str).collect();
        md == counts && exp.metadata().len() == exp.counts().n_samples()
    }

    #[test]
    fn test_conditions_take_precedence_over_gene() {
        let conditions = ConditionsTable::from_rows(
            ids(&["group"]),
            vec![
                ("A".to_string(), ids(&["cond1"])),
                ("B".to_string(), ids(&["cond2"])),
            ],
        );
        let strategy = ColoringStrategy::select(
            Some(conditions),
            Some("group".to_string()),
            Some("g1".to_string()),
        );
        let exp = Experiment::new(table(), strategy);
        assert_eq!(exp.metadata().get("A").unwrap().condition, "cond1");
        assert_eq!(exp.metadata().get("B").unwrap().condition, "cond2");
        assert!(covers_samples(&exp));
    }

    #[test]
    fn test_recolor_keeps_coverage() {
        let mut exp = Experiment::new(table(), ColoringStrategy::Default);
        assert!(covers_samples(&exp));
        assert_eq!(exp.metadata().get("A").unwrap().condition, DEFAULT_CONDITION);

        exp.recolor("g3");
        assert!(covers_samples(&exp));
        match exp.metadata().get("B").unwrap().color {
            ColorValue::Level(v) => assert_abs_diff_eq!(v, 9f64.log2(), epsilon = 1e-12),
            ref other => panic!("expected an expression level, got {:?}", other),
        }
        assert_eq!(exp.metadata().get("B").unwrap().condition, EXPRESSION_CONDITION);

        exp.recolor("missing");
        assert!(covers_samples(&exp));
        assert_eq!(exp.metadata().get("A").unwrap().condition, DEFAULT_CONDITION);
    }

    #[test]
    fn test_coverage_survives_transforms() {
        let mut exp = Experiment::new(table(), ColoringStrategy::Default);
        exp.counts_mut().min_row_sum_cutoff(1.0);
        exp.counts_mut().as_log2(1.0).unwrap();
        assert_eq!(exp.counts().n_features(), 2);
        assert!(covers_samples(&exp));
    }
}
