//! Per-sample display metadata: color values, condition labels and hex fills.
//!
//! Metadata is derived by one of three strategies (see [`ColoringStrategy`]):
//! a conditions table column, one gene's expression level, or a uniform default.
//! Hex fills come from a named sequential [`Colormap`] for expression levels and
//! from a fixed qualitative palette for condition codes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};

use crate::error::{DecomposeError, Result};
use crate::table::{read_delimited, ExpressionTable};

/// Fill used by the default coloring.
pub const DEFAULT_COLOR: &str = "blue";

/// Condition label used by the default coloring.
pub const DEFAULT_CONDITION: &str = "condition";

/// Condition label used when coloring by a gene's expression.
pub const EXPRESSION_CONDITION: &str = "expression";

/// Condition assigned to count-table samples absent from the conditions table.
pub const UNASSIGNED_CONDITION: &str = "NA";

/// Qualitative palette cycled over sorted condition codes.
pub const CONDITION_PALETTE: [&str; 6] = [
    "#9b59b6", "#3498db", "#95a5a6", "#e74c3c", "#34495e", "#2ecc71",
];

/// Entries in a colormap lookup table.
const LUT_SIZE: usize = 256;

// --- Colormaps ---

/// Named sequential colormaps, each an evenly spaced list of color stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colormap {
    Purples,
    Blues,
    Greens,
    Oranges,
    Reds,
    Greys,
    Viridis,
}

impl Colormap {
    fn stops(self) -> &'static [[u8; 3]] {
        match self {
            Colormap::Purples => &[
                [0xfc, 0xfb, 0xfd], [0xef, 0xed, 0xf5], [0xda, 0xda, 0xeb],
                [0xbc, 0xbd, 0xdc], [0x9e, 0x9a, 0xc8], [0x80, 0x7d, 0xba],
                [0x6a, 0x51, 0xa3], [0x54, 0x27, 0x8f], [0x3f, 0x00, 0x7d],
            ],
            Colormap::Blues => &[
                [0xf7, 0xfb, 0xff], [0xde, 0xeb, 0xf7], [0xc6, 0xdb, 0xef],
                [0x9e, 0xca, 0xe1], [0x6b, 0xae, 0xd6], [0x42, 0x92, 0xc6],
                [0x21, 0x71, 0xb5], [0x08, 0x51, 0x9c], [0x08, 0x30, 0x6b],
            ],
            Colormap::Greens => &[
                [0xf7, 0xfc, 0xf5], [0xe5, 0xf5, 0xe0], [0xc7, 0xe9, 0xc0],
                [0xa1, 0xd9, 0x9b], [0x74, 0xc4, 0x76], [0x41, 0xab, 0x5d],
                [0x23, 0x8b, 0x45], [0x00, 0x6d, 0x2c], [0x00, 0x44, 0x1b],
            ],
            Colormap::Oranges => &[
                [0xff, 0xf5, 0xeb], [0xfe, 0xe6, 0xce], [0xfd, 0xd0, 0xa2],
                [0xfd, 0xae, 0x6b], [0xfd, 0x8d, 0x3c], [0xf1, 0x69, 0x13],
                [0xd9, 0x48, 0x01], [0xa6, 0x36, 0x03], [0x7f, 0x27, 0x04],
            ],
            Colormap::Reds => &[
                [0xff, 0xf5, 0xf0], [0xfe, 0xe0, 0xd2], [0xfc, 0xbb, 0xa1],
                [0xfc, 0x92, 0x72], [0xfb, 0x6a, 0x4a], [0xef, 0x3b, 0x2c],
                [0xcb, 0x18, 0x1d], [0xa5, 0x0f, 0x15], [0x67, 0x00, 0x0d],
            ],
            Colormap::Greys => &[
                [0xff, 0xff, 0xff], [0xf0, 0xf0, 0xf0], [0xd9, 0xd9, 0xd9],
                [0xbd, 0xbd, 0xbd], [0x96, 0x96, 0x96], [0x73, 0x73, 0x73],
                [0x52, 0x52, 0x52], [0x25, 0x25, 0x25], [0x00, 0x00, 0x00],
            ],
            Colormap::Viridis => &[
                [0x44, 0x01, 0x54], [0x48, 0x24, 0x75], [0x41, 0x44, 0x87],
                [0x35, 0x5f, 0x8d], [0x2a, 0x78, 0x8e], [0x21, 0x91, 0x8c],
                [0x22, 0xa8, 0x84], [0x44, 0xbf, 0x70], [0x7a, 0xd1, 0x51],
                [0xbd, 0xdf, 0x26], [0xfd, 0xe7, 0x25],
            ],
        }
    }

    /// Looks `x` up in the 256-entry table: values below 0 take the first entry, values at
    /// or above 1 the last. `None` for NaN.
    pub fn rgb(self, x: f64) -> Option<[f64; 3]> {
        if x.is_nan() {
            return None;
        }
        let idx = if x < 0.0 {
            0
        } else {
            ((x * LUT_SIZE as f64) as usize).min(LUT_SIZE - 1)
        };
        let stops = self.stops();
        let pos = idx as f64 / (LUT_SIZE - 1) as f64 * (stops.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(stops.len() - 1);
        let frac = pos - lo as f64;
        let mut out = [0.0; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let a = stops[lo][c] as f64 / 255.0;
            let b = stops[hi][c] as f64 / 255.0;
            *slot = a + (b - a) * frac;
        }
        Some(out)
    }

    /// `#rrggbb` for `x`; NaN maps to black.
    pub fn hex(self, x: f64) -> String {
        match self.rgb(x) {
            Some(rgb) => rgb_to_hex(rgb),
            None => "#000000".to_string(),
        }
    }
}

impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "purples" => Ok(Colormap::Purples),
            "blues" => Ok(Colormap::Blues),
            "greens" => Ok(Colormap::Greens),
            "oranges" => Ok(Colormap::Oranges),
            "reds" => Ok(Colormap::Reds),
            "greys" | "grays" => Ok(Colormap::Greys),
            "viridis" => Ok(Colormap::Viridis),
            other => Err(format!(
                "unknown colormap '{}' (expected Purples, Blues, Greens, Oranges, Reds, Greys or Viridis)",
                other
            )),
        }
    }
}

/// Truncating `[0, 1]` float to `#rrggbb`.
fn rgb_to_hex(rgb: [f64; 3]) -> String {
    // nudge so that k/255 * 255 truncates back to k
    let channel = |c: f64| (c * 255.0 + 1e-6).clamp(0.0, 255.0) as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(rgb[0]),
        channel(rgb[1]),
        channel(rgb[2])
    )
}

/// Scaling applied to a numeric color series before colormap lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HexScale {
    /// Shift by +1 and divide by the shifted maximum.
    pub normalize: bool,
    /// Subtracted after (optional) normalization; keeps the top of the range off the
    /// colormap's darkest endpoint.
    pub offset: f64,
}

impl Default for HexScale {
    fn default() -> Self {
        Self {
            normalize: true,
            offset: 0.1,
        }
    }
}

/// Maps a numeric color series to hex strings through `colormap`.
pub fn to_hex(values: &[f64], colormap: Colormap, scale: HexScale) -> Vec<String> {
    let shifted: Vec<f64> = if scale.normalize {
        let max = values
            .iter()
            .map(|v| v + 1.0)
            .filter(|v| !v.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        if max.is_finite() && max != 0.0 {
            values.iter().map(|v| (v + 1.0) / max).collect()
        } else {
            values.iter().map(|v| v + 1.0).collect()
        }
    } else {
        values.to_vec()
    };
    shifted
        .into_iter()
        .map(|v| colormap.hex(v - scale.offset))
        .collect()
}

/// Hex for the few named fills metadata can carry.
pub fn named_color_hex(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "blue" => Some("#0000ff"),
        "red" => Some("#ff0000"),
        "green" => Some("#008000"),
        "purple" => Some("#800080"),
        "black" => Some("#000000"),
        "grey" | "gray" => Some("#808080"),
        _ => None,
    }
}

// --- Metadata ---

/// A sample's color value, before it is turned into a display fill.
#[derive(Clone, Debug, PartialEq)]
pub enum ColorValue {
    /// Index of the sample's condition among the sorted distinct conditions.
    Category(usize),
    /// Continuous level, e.g. log2 expression.
    Level(f64),
    /// A named fill such as `"blue"`.
    Named(String),
}

impl fmt::Display for ColorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorValue::Category(code) => write!(f, "{}", code),
            ColorValue::Level(level) => write!(f, "{}", level),
            ColorValue::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataRow {
    pub sample: String,
    pub color: ColorValue,
    pub condition: String,
    pub hex: Option<String>,
}

/// One row per sample, in the order of the expression table's columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    rows: Vec<MetadataRow>,
}

impl Metadata {
    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, sample: &str) -> Option<&MetadataRow> {
        self.rows.iter().find(|row| row.sample == sample)
    }

    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.sample.as_str())
    }

    /// Distinct condition labels in order of first appearance.
    pub fn conditions(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.condition.as_str()) {
                seen.push(row.condition.as_str());
            }
        }
        seen
    }

    /// Fills the `hex` column. Categories use [`CONDITION_PALETTE`], levels go through
    /// [`to_hex`] together so normalization sees the whole series.
    pub fn assign_hex(&mut self, colormap: Colormap, scale: HexScale) {
        let level_rows: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches!(row.color, ColorValue::Level(_)))
            .map(|(i, _)| i)
            .collect();
        let levels: Vec<f64> = level_rows
            .iter()
            .map(|&i| match self.rows[i].color {
                ColorValue::Level(v) => v,
                _ => f64::NAN,
            })
            .collect();
        let level_hex = to_hex(&levels, colormap, scale);
        for (i, hex) in level_rows.into_iter().zip(level_hex) {
            self.rows[i].hex = Some(hex);
        }

        for row in &mut self.rows {
            match &row.color {
                ColorValue::Category(code) => {
                    row.hex = Some(CONDITION_PALETTE[code % CONDITION_PALETTE.len()].to_string());
                }
                ColorValue::Named(name) => {
                    let hex = named_color_hex(name).unwrap_or_else(|| {
                        warn!("Unknown color name '{}', drawing sample '{}' in blue.", name, row.sample);
                        "#0000ff"
                    });
                    row.hex = Some(hex.to_string());
                }
                ColorValue::Level(_) => {}
            }
        }
    }

    /// Writes `sample, color, condition[, hex]` tab-delimited.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let with_hex = self.rows.iter().any(|row| row.hex.is_some());
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "\tcolor\tcondition")?;
        if with_hex {
            write!(writer, "\thex")?;
        }
        writeln!(writer)?;
        for row in &self.rows {
            write!(writer, "{}\t{}\t{}", row.sample, row.color, row.condition)?;
            if with_hex {
                write!(writer, "\t{}", row.hex.as_deref().unwrap_or(""))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

// --- Conditions table ---

/// Samples as rows, categorical annotations as columns.
#[derive(Clone, Debug)]
pub struct ConditionsTable {
    columns: Vec<String>,
    samples: Vec<String>,
    values: Vec<Vec<String>>,
}

impl ConditionsTable {
    pub fn load(path: &Path) -> Result<Self> {
        let parsed = read_delimited(path, 0)?;
        let columns: Vec<String> = parsed.header.iter().skip(1).cloned().collect();
        let mut samples: Vec<String> = Vec::with_capacity(parsed.rows.len());
        let mut values = Vec::with_capacity(parsed.rows.len());
        let mut seen = HashSet::with_capacity(parsed.rows.len());
        for (line_no, fields) in parsed.rows {
            if fields.len() != columns.len() + 1 {
                return Err(DecomposeError::malformed(
                    path,
                    format!(
                        "line {} has {} fields, expected {}",
                        line_no,
                        fields.len(),
                        columns.len() + 1
                    ),
                ));
            }
            if !seen.insert(fields[0].clone()) {
                return Err(DecomposeError::malformed(
                    path,
                    format!("line {} repeats sample '{}'", line_no, fields[0]),
                ));
            }
            let mut fields = fields.into_iter();
            samples.extend(fields.next());
            values.push(fields.collect());
        }
        info!(
            "Loaded conditions for {} samples ({} column(s)) from {}.",
            samples.len(),
            columns.len(),
            path.display()
        );
        Ok(Self {
            columns,
            samples,
            values,
        })
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<(String, Vec<String>)>) -> Self {
        let (samples, values) = rows.into_iter().unzip();
        Self {
            columns,
            samples,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `sample -> value` for one column.
    pub fn column(&self, name: &str) -> Option<HashMap<&str, &str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.samples
                .iter()
                .zip(&self.values)
                .filter_map(|(sample, row)| row.get(idx).map(|v| (sample.as_str(), v.as_str())))
                .collect(),
        )
    }
}

// --- Coloring strategies ---

/// Which source per-sample metadata is derived from.
#[derive(Clone, Debug)]
pub enum ColoringStrategy {
    ByCondition {
        conditions: ConditionsTable,
        column: String,
    },
    ByGeneExpression {
        gene_id: String,
    },
    Default,
}

impl ColoringStrategy {
    /// Conditions table + column beats a gene id, which beats the default.
    pub fn select(
        conditions: Option<ConditionsTable>,
        column: Option<String>,
        gene_id: Option<String>,
    ) -> Self {
        match (conditions, column, gene_id) {
            (Some(conditions), Some(column), _) => ColoringStrategy::ByCondition { conditions, column },
            (_, _, Some(gene_id)) => ColoringStrategy::ByGeneExpression { gene_id },
            _ => ColoringStrategy::Default,
        }
    }

    pub fn metadata(&self, table: &ExpressionTable) -> Metadata {
        match self {
            ColoringStrategy::ByCondition { conditions, column } => {
                from_conditions(conditions, column, table.sample_ids())
            }
            ColoringStrategy::ByGeneExpression { gene_id } => from_gene_expression(table, gene_id),
            ColoringStrategy::Default => from_nothing(table.sample_ids()),
        }
    }
}

/// One category per distinct value of `column` (codes assigned over the sorted values).
/// Falls back to the first column when `column` is absent.
pub fn from_conditions(conditions: &ConditionsTable, column: &str, sample_ids: &[String]) -> Metadata {
    let (used, mapping) = match conditions.column(column) {
        Some(mapping) => (column, mapping),
        None => match conditions.columns().first() {
            Some(first) => {
                warn!(
                    "{} does not exist as a column in the conditions table, reverting to {}.",
                    column, first
                );
                let mapping = conditions.column(first).unwrap_or_default();
                (first.as_str(), mapping)
            }
            None => {
                warn!("Conditions table has no columns, using default coloring.");
                return from_nothing(sample_ids);
            }
        },
    };

    let mut missing = 0usize;
    let labels: Vec<&str> = sample_ids
        .iter()
        .map(|sample| match mapping.get(sample.as_str()) {
            Some(label) => *label,
            None => {
                missing += 1;
                UNASSIGNED_CONDITION
            }
        })
        .collect();
    if missing > 0 {
        warn!(
            "{} sample(s) have no '{}' entry in the conditions table and are labelled '{}'.",
            missing, used, UNASSIGNED_CONDITION
        );
    }
    let extra = mapping
        .keys()
        .filter(|s| !sample_ids.iter().any(|id| id == *s))
        .count();
    if extra > 0 {
        debug!("{} conditions table sample(s) are not in the counts table.", extra);
    }

    let distinct: BTreeSet<&str> = labels.iter().copied().collect();
    let codes: HashMap<&str, usize> = distinct.into_iter().enumerate().map(|(c, l)| (l, c)).collect();
    Metadata {
        rows: sample_ids
            .iter()
            .zip(labels)
            .map(|(sample, label)| MetadataRow {
                sample: sample.clone(),
                color: ColorValue::Category(codes[label]),
                condition: label.to_string(),
                hex: None,
            })
            .collect(),
    }
}

/// `log2(x + 1)` of `gene_id`'s expression per sample; default coloring if the gene is absent.
pub fn from_gene_expression(table: &ExpressionTable, gene_id: &str) -> Metadata {
    match table.row(gene_id) {
        Some(expr) => Metadata {
            rows: table
                .sample_ids()
                .iter()
                .zip(expr.iter())
                .map(|(sample, &v)| MetadataRow {
                    sample: sample.clone(),
                    color: ColorValue::Level((v + 1.0).log2()),
                    condition: EXPRESSION_CONDITION.to_string(),
                    hex: None,
                })
                .collect(),
        },
        None => {
            warn!("Gene '{}' not found in table, using default coloring.", gene_id);
            from_nothing(table.sample_ids())
        }
    }
}

/// Every sample drawn in [`DEFAULT_COLOR`] under [`DEFAULT_CONDITION`].
pub fn from_nothing(sample_ids: &[String]) -> Metadata {
    Metadata {
        rows: sample_ids
            .iter()
            .map(|sample| MetadataRow {
                sample: sample.clone(),
                color: ColorValue::Named(DEFAULT_COLOR.to_string()),
                condition: DEFAULT_CONDITION.to_string(),
                hex: None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn conditions() -> ConditionsTable {
        ConditionsTable::from_rows(
            ids(&["treatment", "batch"]),
            vec![
                ("A".to_string(), ids(&["ko", "b1"])),
                ("B".to_string(), ids(&["wt", "b1"])),
                ("C".to_string(), ids(&["ko", "b2"])),
                ("Z".to_string(), ids(&["wt", "b2"])),
            ],
        )
    }

    fn table() -> ExpressionTable {
        ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2"]),
            ids(&["A", "B", "C"]),
            array![[3.0, 0.0, 7.0], [1.0, 1.0, 1.0]],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_colormap_endpoints() {
        assert_eq!(Colormap::Purples.hex(0.0), "#fcfbfd");
        assert_eq!(Colormap::Purples.hex(-0.3), "#fcfbfd");
        assert_eq!(Colormap::Purples.hex(1.0), "#3f007d");
        assert_eq!(Colormap::Purples.hex(5.0), "#3f007d");
        assert_eq!(Colormap::Purples.hex(f64::NAN), "#000000");
    }

    #[test]
    fn test_colormap_from_str() {
        assert_eq!("purples".parse::<Colormap>().unwrap(), Colormap::Purples);
        assert_eq!("Viridis".parse::<Colormap>().unwrap(), Colormap::Viridis);
        assert!("jet".parse::<Colormap>().is_err());
    }

    #[test]
    fn test_to_hex_is_deterministic() {
        let values = [0.0, 1.5, 3.0, 0.25];
        let a = to_hex(&values, Colormap::Purples, HexScale::default());
        let b = to_hex(&values, Colormap::Purples, HexScale::default());
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.iter().all(|h| h.len() == 7 && h.starts_with('#')));
    }

    #[test]
    fn test_to_hex_normalization_with_offset() {
        // max of (v + 1) is 4, so 3.0 -> 1.0 - 0.1 = 0.9 and 0.0 -> 0.25 - 0.1 = 0.15
        let hex = to_hex(&[0.0, 3.0], Colormap::Greys, HexScale::default());
        assert_eq!(hex[0], Colormap::Greys.hex(0.15));
        assert_eq!(hex[1], Colormap::Greys.hex(0.9));
        // darker for higher expression
        assert!(hex[1] < hex[0]);
    }

    #[test]
    fn test_from_conditions_sorted_codes() {
        let md = from_conditions(&conditions(), "treatment", &ids(&["A", "B", "C"]));
        assert_eq!(md.len(), 3);
        let a = md.get("A").unwrap();
        assert_eq!(a.condition, "ko");
        assert_eq!(a.color, ColorValue::Category(0));
        assert_eq!(md.get("B").unwrap().color, ColorValue::Category(1));
        assert_eq!(md.get("C").unwrap().color, ColorValue::Category(0));
        // Z is in the conditions table but not in the counts table
        assert!(md.get("Z").is_none());
    }

    #[test]
    fn test_from_conditions_falls_back_to_first_column() {
        let md = from_conditions(&conditions(), "nope", &ids(&["A", "B"]));
        assert_eq!(md.get("A").unwrap().condition, "ko");
        assert_eq!(md.get("B").unwrap().condition, "wt");
    }

    #[test]
    fn test_from_conditions_labels_unknown_samples() {
        let md = from_conditions(&conditions(), "batch", &ids(&["A", "Q"]));
        assert_eq!(md.get("Q").unwrap().condition, UNASSIGNED_CONDITION);
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn test_from_gene_expression() {
        let md = from_gene_expression(&table(), "g1");
        assert_eq!(md.get("A").unwrap().color, ColorValue::Level(2.0));
        assert_eq!(md.get("B").unwrap().color, ColorValue::Level(0.0));
        assert_eq!(md.get("C").unwrap().color, ColorValue::Level(3.0));
        assert!(md.rows().iter().all(|r| r.condition == EXPRESSION_CONDITION));
    }

    #[test]
    fn test_missing_gene_falls_back_to_default() {
        let md = from_gene_expression(&table(), "gX");
        assert_eq!(md, from_nothing(&ids(&["A", "B", "C"])));
        assert_eq!(md.get("A").unwrap().color, ColorValue::Named("blue".to_string()));
        assert_eq!(md.get("A").unwrap().condition, DEFAULT_CONDITION);
    }

    #[test]
    fn test_strategy_precedence() {
        let strategy = ColoringStrategy::select(
            Some(conditions()),
            Some("treatment".to_string()),
            Some("g1".to_string()),
        );
        let md = strategy.metadata(&table());
        assert_eq!(md.conditions(), vec!["ko", "wt"]);

        let strategy = ColoringStrategy::select(Some(conditions()), None, Some("g1".to_string()));
        assert!(matches!(strategy, ColoringStrategy::ByGeneExpression { .. }));
        assert!(matches!(
            ColoringStrategy::select(None, Some("treatment".to_string()), None),
            ColoringStrategy::Default
        ));
    }

    #[test]
    fn test_assign_hex() {
        let mut md = from_conditions(&conditions(), "treatment", &ids(&["A", "B"]));
        md.assign_hex(Colormap::Purples, HexScale::default());
        assert_eq!(md.get("A").unwrap().hex.as_deref(), Some(CONDITION_PALETTE[0]));
        assert_eq!(md.get("B").unwrap().hex.as_deref(), Some(CONDITION_PALETTE[1]));

        let mut md = from_nothing(&ids(&["A"]));
        md.assign_hex(Colormap::Purples, HexScale::default());
        assert_eq!(md.get("A").unwrap().hex.as_deref(), Some("#0000ff"));

        let mut md = from_gene_expression(&table(), "g1");
        md.assign_hex(Colormap::Purples, HexScale::default());
        let expected = to_hex(&[2.0, 0.0, 3.0], Colormap::Purples, HexScale::default());
        let got: Vec<String> = md.rows().iter().map(|r| r.hex.clone().unwrap()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_conditions_table_rejects_repeated_sample() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "sample\tgroup\nA\tko\nB\twt\nA\twt\n").unwrap();
        let err = ConditionsTable::load(file.path()).unwrap_err();
        match err {
            DecomposeError::MalformedInput { reason, .. } => assert!(reason.contains("'A'")),
            other => panic!("unexpected error: {}", other),
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "sample\tgroup\nA\tko\nB\twt\n").unwrap();
        let table = ConditionsTable::load(file.path()).unwrap();
        assert_eq!(table.column("group").unwrap()["A"], "ko");
    }
}
