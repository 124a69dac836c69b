// table.rs

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{DecomposeError, Result};

/// Number of annotation columns (`Geneid` excluded) preceding the samples in a featureCounts table.
const FEATURE_COUNTS_ANNOTATION_COLUMNS: usize = 5;

/// Position of `Length` among the featureCounts annotation columns (after `Geneid`).
const FEATURE_COUNTS_LENGTH_COLUMN: usize = 4;

/// How raw input becomes `(data, length)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    /// Feature ids in the first column, sample ids in the header row.
    Matrix,
    /// featureCounts output: one comment line, then
    /// `Geneid Chr Start End Strand Length <samples...>`.
    FeatureCounts,
}

/// One entry of the transform log kept by [`ExpressionTable`].
#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    Subset { requested: usize, kept: usize },
    MinRowSumCutoff { threshold: f64, kept: usize },
    Log2 { pseudocount: f64 },
    Rpkm,
}

/// Feature x sample numeric matrix with an optional per-feature length vector.
///
/// Transforms mutate the table in place and are appended to [`ExpressionTable::history`].
/// The lengths vector, when present, is always aligned row-for-row with the data.
#[derive(Clone, Debug)]
pub struct ExpressionTable {
    index_name: String,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
    data: Array2<f64>,
    lengths: Option<Array1<f64>>,
    history: Vec<Transform>,
}

// --- Construction & Loading ---

impl ExpressionTable {
    /// Builds a table from parts, checking shapes and id uniqueness.
    pub fn from_parts(
        index_name: impl Into<String>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
        data: Array2<f64>,
        lengths: Option<Array1<f64>>,
    ) -> Result<Self> {
        let origin = Path::new("<in-memory>");
        if data.nrows() != feature_ids.len() || data.ncols() != sample_ids.len() {
            return Err(DecomposeError::malformed(
                origin,
                format!(
                    "data is {}x{} but {} feature ids and {} sample ids were given",
                    data.nrows(),
                    data.ncols(),
                    feature_ids.len(),
                    sample_ids.len()
                ),
            ));
        }
        if let Some(l) = &lengths {
            if l.len() != feature_ids.len() {
                return Err(DecomposeError::malformed(
                    origin,
                    format!("{} lengths for {} features", l.len(), feature_ids.len()),
                ));
            }
        }
        ensure_unique_features(origin, &feature_ids)?;
        ensure_unique_samples(origin, &sample_ids)?;
        Ok(Self {
            index_name: index_name.into(),
            feature_ids,
            sample_ids,
            data,
            lengths,
            history: Vec::new(),
        })
    }

    /// Reads a table in the given format. A separate lengths file is only consulted for
    /// [`TableFormat::Matrix`]; featureCounts tables carry their own `Length` column.
    pub fn load(path: &Path, format: TableFormat, lengths_file: Option<&Path>) -> Result<Self> {
        let mut table = match format {
            TableFormat::Matrix => Self::load_matrix(path)?,
            TableFormat::FeatureCounts => Self::load_feature_counts(path)?,
        };
        match (format, lengths_file) {
            (TableFormat::Matrix, Some(lengths_path)) => {
                let lengths = read_lengths_file(lengths_path)?;
                table.attach_lengths(&lengths, lengths_path);
            }
            (TableFormat::FeatureCounts, Some(lengths_path)) => {
                warn!(
                    "Ignoring lengths file {}: featureCounts input already provides a Length column.",
                    lengths_path.display()
                );
            }
            _ => {}
        }
        info!(
            "Loaded {} features x {} samples from {}.",
            table.n_features(),
            table.n_samples(),
            path.display()
        );
        Ok(table)
    }

    fn load_matrix(path: &Path) -> Result<Self> {
        let parsed = read_delimited(path, 0)?;
        let (index_name, sample_ids) = split_header(path, &parsed.header, 1)?;
        let mut feature_ids = Vec::with_capacity(parsed.rows.len());
        let mut values = Vec::with_capacity(parsed.rows.len() * sample_ids.len());

        for (line_no, fields) in &parsed.rows {
            if fields.len() != sample_ids.len() + 1 {
                return Err(DecomposeError::malformed(
                    path,
                    format!(
                        "line {} has {} fields, expected {}",
                        line_no,
                        fields.len(),
                        sample_ids.len() + 1
                    ),
                ));
            }
            feature_ids.push(fields[0].clone());
            for (col, raw) in fields[1..].iter().enumerate() {
                values.push(parse_value(path, *line_no, &sample_ids[col], raw)?);
            }
        }

        finish_load(path, index_name, feature_ids, sample_ids, values, None)
    }

    fn load_feature_counts(path: &Path) -> Result<Self> {
        // featureCounts writes exactly one "# Program:..." line before the header
        let parsed = read_delimited(path, 1)?;
        let leading = FEATURE_COUNTS_ANNOTATION_COLUMNS + 1;
        let (index_name, sample_ids) = split_header(path, &parsed.header, leading)?;
        if parsed.header[FEATURE_COUNTS_LENGTH_COLUMN + 1] != "Length" {
            warn!(
                "Column {} of {} is '{}', expected 'Length'. Using it as feature lengths anyway.",
                FEATURE_COUNTS_LENGTH_COLUMN + 2,
                path.display(),
                parsed.header[FEATURE_COUNTS_LENGTH_COLUMN + 1]
            );
        }

        let mut feature_ids = Vec::with_capacity(parsed.rows.len());
        let mut lengths = Vec::with_capacity(parsed.rows.len());
        let mut values = Vec::with_capacity(parsed.rows.len() * sample_ids.len());

        for (line_no, fields) in &parsed.rows {
            if fields.len() != sample_ids.len() + leading {
                return Err(DecomposeError::malformed(
                    path,
                    format!(
                        "line {} has {} fields, expected {}",
                        line_no,
                        fields.len(),
                        sample_ids.len() + leading
                    ),
                ));
            }
            feature_ids.push(fields[0].clone());
            lengths.push(parse_length(path, *line_no, &fields[FEATURE_COUNTS_LENGTH_COLUMN + 1])?);
            for (col, raw) in fields[leading..].iter().enumerate() {
                values.push(parse_value(path, *line_no, &sample_ids[col], raw)?);
            }
        }

        finish_load(
            path,
            index_name,
            feature_ids,
            sample_ids,
            values,
            Some(Array1::from(lengths)),
        )
    }

    /// Aligns an external `id -> length` map onto the table. Features without a length are
    /// dropped (with a warning) so that the lengths vector covers every surviving row.
    fn attach_lengths(&mut self, lengths: &HashMap<String, f64>, source: &Path) {
        let keep: Vec<usize> = self
            .feature_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| lengths.contains_key(id.as_str()))
            .map(|(i, _)| i)
            .collect();

        if keep.len() != self.n_features() || lengths.len() != keep.len() {
            warn!(
                "Length annotations in {} and expression features don't match. Taking the intersection of {} length features and {} table features ({} kept).",
                source.display(),
                lengths.len(),
                self.n_features(),
                keep.len()
            );
        }
        if keep.len() != self.n_features() {
            self.retain_rows(&keep);
        }
        let aligned: Array1<f64> = self
            .feature_ids
            .iter()
            .map(|id| lengths.get(id.as_str()).copied().unwrap_or(f64::NAN))
            .collect();
        self.lengths = Some(aligned);
    }
}

// --- Accessors ---

impl ExpressionTable {
    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Features as rows, samples as columns.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn lengths(&self) -> Option<&Array1<f64>> {
        self.lengths.as_ref()
    }

    pub fn history(&self) -> &[Transform] {
        &self.history
    }

    pub fn is_log2(&self) -> bool {
        self.history.iter().any(|t| matches!(t, Transform::Log2 { .. }))
    }

    pub fn is_rpkm(&self) -> bool {
        self.history.iter().any(|t| matches!(t, Transform::Rpkm))
    }

    pub fn feature_index(&self, feature_id: &str) -> Option<usize> {
        self.feature_ids.iter().position(|id| id == feature_id)
    }

    /// Expression of one feature across all samples.
    pub fn row(&self, feature_id: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_index(feature_id).map(|i| self.data.row(i))
    }

    /// Owned samples x features copy, the orientation decompositions expect.
    pub fn samples_by_features(&self) -> Array2<f64> {
        self.data.t().to_owned()
    }
}

// --- Transforms ---

impl ExpressionTable {
    /// Keeps only rows whose id appears in `ids`. Unknown ids are ignored, table order is kept.
    pub fn subset<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        let before = self.n_features();
        let keep: Vec<usize> = self
            .feature_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| wanted.contains(id.as_str()))
            .map(|(i, _)| i)
            .collect();

        let absent = wanted.len() - keep.len();
        if absent > 0 {
            debug!("{} requested subset id(s) are not in the table and were skipped.", absent);
        }
        self.retain_rows(&keep);
        info!("Subset: {} -> {} features.", before, self.n_features());
        self.history.push(Transform::Subset {
            requested: wanted.len(),
            kept: self.n_features(),
        });
    }

    /// Keeps rows whose sum across samples is `>= threshold`.
    pub fn min_row_sum_cutoff(&mut self, threshold: f64) {
        let before = self.n_features();
        let keep: Vec<usize> = self
            .data
            .sum_axis(Axis(1))
            .iter()
            .enumerate()
            .filter(|(_, &sum)| sum >= threshold)
            .map(|(i, _)| i)
            .collect();
        self.retain_rows(&keep);
        info!(
            "Row-sum cutoff at {}: {} -> {} features.",
            threshold,
            before,
            self.n_features()
        );
        self.history.push(Transform::MinRowSumCutoff {
            threshold,
            kept: self.n_features(),
        });
    }

    /// Replaces every value `v` with `log2(v + pseudocount)`.
    ///
    /// Rejects a second application and any value for which `v + pseudocount < 0`.
    /// `v + pseudocount == 0` yields `-inf`.
    pub fn as_log2(&mut self, pseudocount: f64) -> Result<()> {
        if self.is_log2() {
            return Err(DecomposeError::TransformOrder {
                operation: "log2",
                reason: "table is already log2-transformed".to_string(),
            });
        }
        if let Some(((row, col), v)) = self
            .data
            .indexed_iter()
            .find(|(_, &v)| v + pseudocount < 0.0)
        {
            return Err(DecomposeError::NumericalDomain {
                operation: "log2",
                reason: format!(
                    "value {} for feature '{}' in sample '{}' is negative after adding pseudocount {}",
                    v, self.feature_ids[row], self.sample_ids[col], pseudocount
                ),
            });
        }
        self.data.mapv_inplace(|v| (v + pseudocount).log2());
        info!("Applied log2(x + {}) to {} features.", pseudocount, self.n_features());
        self.history.push(Transform::Log2 { pseudocount });
        Ok(())
    }

    /// RPKM on the current values: `x[i,j] * 1e9 / (sum_i x[i,j] * length[i])`.
    pub fn as_rpkm(&mut self) -> Result<()> {
        if self.is_rpkm() {
            return Err(DecomposeError::TransformOrder {
                operation: "rpkm",
                reason: "table is already RPKM-normalized".to_string(),
            });
        }
        if self.is_log2() {
            return Err(DecomposeError::TransformOrder {
                operation: "rpkm",
                reason: "RPKM needs linear counts but the table is log2-transformed".to_string(),
            });
        }
        if self.n_features() == 0 || self.n_samples() == 0 {
            return Err(DecomposeError::EmptyTable { operation: "rpkm" });
        }
        let lengths = match &self.lengths {
            Some(l) => l,
            None => {
                return Err(DecomposeError::MissingLength {
                    ids: self.feature_ids.clone(),
                })
            }
        };

        let missing: Vec<String> = lengths
            .iter()
            .zip(&self.feature_ids)
            .filter(|(l, _)| l.is_nan())
            .map(|(_, id)| id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(DecomposeError::MissingLength { ids: missing });
        }
        if let Some((&value, id)) = lengths
            .iter()
            .zip(&self.feature_ids)
            .find(|(l, _)| !l.is_finite() || **l <= 0.0)
        {
            return Err(DecomposeError::InvalidLength {
                id: id.clone(),
                value,
            });
        }

        let mapped_reads = self.data.sum_axis(Axis(0));
        if let Some(j) = mapped_reads.iter().position(|&total| total == 0.0) {
            return Err(DecomposeError::ZeroLibrarySize {
                sample: self.sample_ids[j].clone(),
            });
        }

        for ((i, j), v) in self.data.indexed_iter_mut() {
            *v = *v * 1e9 / (mapped_reads[j] * lengths[i]);
        }
        info!("Converted {} features to RPKM.", self.n_features());
        self.history.push(Transform::Rpkm);
        Ok(())
    }

    fn retain_rows(&mut self, keep: &[usize]) {
        self.data = self.data.select(Axis(0), keep);
        self.feature_ids = keep.iter().map(|&i| self.feature_ids[i].clone()).collect();
        self.lengths = self.lengths.as_ref().map(|l| l.select(Axis(0), keep));
    }
}

// --- Output ---

impl ExpressionTable {
    /// Writes the table tab-delimited, header cell taken from the input's index column.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "{}", self.index_name)?;
        for sample in &self.sample_ids {
            write!(writer, "\t{}", sample)?;
        }
        writeln!(writer)?;
        for (feature, row) in self.feature_ids.iter().zip(self.data.rows()) {
            write!(writer, "{}", feature)?;
            for v in row {
                write!(writer, "\t{}", v)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        debug!("Wrote {}x{} table to {}.", self.n_features(), self.n_samples(), path.display());
        Ok(())
    }
}

// --- Parsing helpers ---

pub(crate) struct DelimitedFile {
    pub(crate) header: Vec<String>,
    /// (1-based line number, fields)
    pub(crate) rows: Vec<(usize, Vec<String>)>,
}

/// Splits a tab-delimited file into a header and rows. The first `skip` lines are dropped
/// unconditionally; after that blank lines and `#` comments are ignored.
pub(crate) fn read_delimited(path: &Path, skip: usize) -> Result<DelimitedFile> {
    let file = File::open(path).map_err(|e| {
        DecomposeError::malformed(path, format!("cannot open file: {}", e))
    })?;
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate().skip(skip) {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<String> = trimmed.split('\t').map(|f| strip_quotes(f)).collect();
        match header {
            None => header = Some(fields),
            Some(_) => rows.push((idx + 1, fields)),
        }
    }

    let header = header.ok_or_else(|| DecomposeError::malformed(path, "no header row"))?;
    Ok(DelimitedFile { header, rows })
}

/// Returns `(index_name, sample_ids)`.
fn split_header(path: &Path, header: &[String], leading: usize) -> Result<(String, Vec<String>)> {
    if header.len() <= leading {
        return Err(DecomposeError::malformed(
            path,
            format!(
                "header has {} column(s); expected {} leading column(s) followed by at least one sample",
                header.len(),
                leading
            ),
        ));
    }
    let index_name = header[0].clone();
    let sample_ids = header[leading..].to_vec();
    ensure_unique_samples(path, &sample_ids)?;
    Ok((index_name, sample_ids))
}

fn finish_load(
    path: &Path,
    index_name: String,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
    values: Vec<f64>,
    lengths: Option<Array1<f64>>,
) -> Result<ExpressionTable> {
    if feature_ids.is_empty() {
        return Err(DecomposeError::malformed(path, "no feature rows"));
    }
    ensure_unique_features(path, &feature_ids)?;
    let data = Array2::from_shape_vec((feature_ids.len(), sample_ids.len()), values)
        .map_err(|e| DecomposeError::malformed(path, e.to_string()))?;
    Ok(ExpressionTable {
        index_name,
        feature_ids,
        sample_ids,
        data,
        lengths,
        history: Vec::new(),
    })
}

fn ensure_unique_features(path: &Path, ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DecomposeError::DuplicateFeature {
                path: path.to_path_buf(),
                id: id.clone(),
            });
        }
    }
    Ok(())
}

fn ensure_unique_samples(path: &Path, ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DecomposeError::malformed(
                path,
                format!("duplicate sample id '{}' in header", id),
            ));
        }
    }
    Ok(())
}

fn parse_value(path: &Path, line_no: usize, sample: &str, raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        DecomposeError::malformed(
            path,
            format!("line {}: non-numeric value '{}' for sample '{}'", line_no, raw, sample),
        )
    })
}

/// Lengths may be blank or NA; those features are kept and only fail at RPKM time.
fn parse_length(path: &Path, line_no: usize, raw: &str) -> Result<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>().map_err(|_| {
        DecomposeError::malformed(path, format!("line {}: non-numeric length '{}'", line_no, raw))
    })
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Reads a header-less `id<TAB>length` file. A first line whose length field is not numeric
/// is taken to be a header and skipped.
pub fn read_lengths_file(path: &Path) -> Result<HashMap<String, f64>> {
    let parsed = read_delimited(path, 0)?;
    let mut lines: Vec<(usize, Vec<String>)> = Vec::with_capacity(parsed.rows.len() + 1);
    lines.push((1, parsed.header));
    lines.extend(parsed.rows);

    let mut lengths = HashMap::with_capacity(lines.len());
    for (pos, (line_no, fields)) in lines.into_iter().enumerate() {
        if fields.len() < 2 {
            return Err(DecomposeError::malformed(
                path,
                format!("line {} needs two fields (id, length)", line_no),
            ));
        }
        let value = match parse_length(path, line_no, &fields[1]) {
            Ok(v) => v,
            Err(e) if pos == 0 => {
                debug!("Treating first line of {} as a header ({}).", path.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if lengths.insert(fields[0].clone(), value).is_some() {
            return Err(DecomposeError::DuplicateFeature {
                path: path.to_path_buf(),
                id: fields[0].clone(),
            });
        }
    }
    Ok(lengths)
}

/// Reads a line-delimited list of feature ids, trimming whitespace and skipping blank lines.
pub fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| {
        DecomposeError::malformed(path, format!("cannot open id list: {}", e))
    })?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn small_table() -> ExpressionTable {
        ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2", "g3"]),
            ids(&["s1", "s2"]),
            array![[10.0, 20.0], [0.0, 1.0], [5.0, 5.0]],
            Some(array![1000.0, 500.0, 2000.0]),
        )
        .unwrap()
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_matrix() {
        let file = write_temp("gene\tA\tB\n# comment\ng1\t1\t2\n\ng2\t3\t4.5\n");
        let table = ExpressionTable::load(file.path(), TableFormat::Matrix, None).unwrap();
        assert_eq!(table.index_name(), "gene");
        assert_eq!(table.sample_ids(), &ids(&["A", "B"])[..]);
        assert_eq!(table.feature_ids(), &ids(&["g1", "g2"])[..]);
        assert_eq!(table.data(), &array![[1.0, 2.0], [3.0, 4.5]]);
        assert!(table.lengths().is_none());
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let file = write_temp("gene\tA\ng1\t1\ng1\t2\n");
        let err = ExpressionTable::load(file.path(), TableFormat::Matrix, None).unwrap_err();
        assert!(matches!(err, DecomposeError::DuplicateFeature { ref id, .. } if id == "g1"));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let file = write_temp("gene\tA\tB\ng1\t1\n");
        let err = ExpressionTable::load(file.path(), TableFormat::Matrix, None).unwrap_err();
        assert!(matches!(err, DecomposeError::MalformedInput { .. }));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let file = write_temp("gene\tA\ng1\tabc\n");
        assert!(ExpressionTable::load(file.path(), TableFormat::Matrix, None).is_err());
    }

    #[test]
    fn test_missing_file_is_malformed_input() {
        let err = ExpressionTable::load(Path::new("/nonexistent/counts.txt"), TableFormat::Matrix, None)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/counts.txt"));
    }

    #[test]
    fn test_load_feature_counts() {
        let file = write_temp(
            "# Program:featureCounts v1.5.0\n\
             Geneid\tChr\tStart\tEnd\tStrand\tLength\ts1.bam\ts2.bam\n\
             g1\tchr1\t1\t100\t+\t100\t5\t10\n\
             g2\tchr1\t200\t300\t-\t\t1\t2\n",
        );
        let table = ExpressionTable::load(file.path(), TableFormat::FeatureCounts, None).unwrap();
        assert_eq!(table.index_name(), "Geneid");
        assert_eq!(table.sample_ids(), &ids(&["s1.bam", "s2.bam"])[..]);
        assert_eq!(table.data(), &array![[5.0, 10.0], [1.0, 2.0]]);
        let lengths = table.lengths().unwrap();
        assert_eq!(lengths[0], 100.0);
        assert!(lengths[1].is_nan());
    }

    #[test]
    fn test_lengths_file_intersection() {
        let counts = write_temp("gene\tA\tB\ng1\t1\t2\ng2\t3\t4\ng3\t5\t6\n");
        let lengths = write_temp("g3\t300\ng1\t100\ngX\t50\n");
        let table =
            ExpressionTable::load(counts.path(), TableFormat::Matrix, Some(lengths.path())).unwrap();
        assert_eq!(table.feature_ids(), &ids(&["g1", "g3"])[..]);
        assert_eq!(table.lengths().unwrap(), &array![100.0, 300.0]);
    }

    #[test]
    fn test_lengths_file_header_skipped() {
        let lengths = write_temp("gene\tLength\ng1\t100\n");
        let map = read_lengths_file(lengths.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["g1"], 100.0);
    }

    #[test]
    fn test_subset_is_intersection() {
        let mut a = small_table();
        a.subset(["g3", "missing", "g1", "g3"]);
        assert_eq!(a.feature_ids(), &ids(&["g1", "g3"])[..]);
        assert_eq!(a.lengths().unwrap(), &array![1000.0, 2000.0]);

        let mut b = small_table();
        b.subset(vec!["g1".to_string(), "g3".to_string()]);
        assert_eq!(a.feature_ids(), b.feature_ids());
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_subset_can_empty_table() {
        let mut table = small_table();
        table.subset(["nothing"]);
        assert_eq!(table.n_features(), 0);
        assert_eq!(table.n_samples(), 2);
        assert_eq!(table.lengths().unwrap().len(), 0);
    }

    #[test]
    fn test_cutoff_inclusive_and_idempotent() {
        let mut table = small_table();
        table.min_row_sum_cutoff(10.0);
        // g2 sums to 1, g3 sums to exactly 10
        assert_eq!(table.feature_ids(), &ids(&["g1", "g3"])[..]);
        assert_eq!(table.lengths().unwrap(), &array![1000.0, 2000.0]);

        let once = table.clone();
        table.min_row_sum_cutoff(10.0);
        assert_eq!(table.feature_ids(), once.feature_ids());
        assert_eq!(table.data(), once.data());
        assert_eq!(table.history().len(), 2);
    }

    #[test]
    fn test_log2_values_and_flag() {
        let mut table = small_table();
        table.as_log2(1.0).unwrap();
        assert_abs_diff_eq!(table.data()[[0, 0]], 11.0_f64.log2(), epsilon = 1e-12);
        assert_abs_diff_eq!(table.data()[[1, 0]], 0.0, epsilon = 1e-12);
        assert!(table.is_log2());
        assert!(matches!(
            table.as_log2(1.0),
            Err(DecomposeError::TransformOrder { .. })
        ));
    }

    #[test]
    fn test_log2_rejects_negative() {
        let mut table = ExpressionTable::from_parts(
            "gene",
            ids(&["g1"]),
            ids(&["s1", "s2"]),
            array![[-2.0, 3.0]],
            None,
        )
        .unwrap();
        assert!(matches!(
            table.as_log2(1.0),
            Err(DecomposeError::NumericalDomain { .. })
        ));
        // untouched on failure
        assert_eq!(table.data(), &array![[-2.0, 3.0]]);
    }

    #[test]
    fn test_log2_zero_is_negative_infinity() {
        let mut table = small_table();
        table.as_log2(0.0).unwrap();
        assert_eq!(table.data()[[1, 0]], f64::NEG_INFINITY);
    }

    #[test]
    fn test_rpkm_formula() {
        let mut table = small_table();
        table.as_rpkm().unwrap();
        // s1 total = 15, g1 length 1000
        assert_abs_diff_eq!(table.data()[[0, 0]], 10.0 * 1e9 / (15.0 * 1000.0), epsilon = 1e-6);
        // s2 total = 26, g3 length 2000
        assert_abs_diff_eq!(table.data()[[2, 1]], 5.0 * 1e9 / (26.0 * 2000.0), epsilon = 1e-6);
        assert!(table.is_rpkm());
    }

    #[test]
    fn test_rpkm_cancels_uniform_scaling() {
        let mut table = ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2", "g3"]),
            ids(&["A", "B"]),
            array![[3.0, 6.0], [7.0, 14.0], [1.0, 2.0]],
            Some(array![150.0, 900.0, 42.0]),
        )
        .unwrap();
        table.as_rpkm().unwrap();
        for row in table.data().rows() {
            assert_abs_diff_eq!(row[0], row[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rpkm_without_lengths_fails() {
        let mut table = ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2"]),
            ids(&["s1"]),
            array![[1.0], [2.0]],
            None,
        )
        .unwrap();
        match table.as_rpkm() {
            Err(DecomposeError::MissingLength { ids: missing }) => assert_eq!(missing.len(), 2),
            other => panic!("expected MissingLength, got {:?}", other),
        }
    }

    #[test]
    fn test_rpkm_missing_single_length_fails() {
        let mut table = ExpressionTable::from_parts(
            "gene",
            ids(&["g1", "g2"]),
            ids(&["s1"]),
            array![[1.0], [2.0]],
            Some(array![100.0, f64::NAN]),
        )
        .unwrap();
        match table.as_rpkm() {
            Err(DecomposeError::MissingLength { ids: missing }) => {
                assert_eq!(missing, vec!["g2".to_string()])
            }
            other => panic!("expected MissingLength, got {:?}", other),
        }
    }

    #[test]
    fn test_rpkm_after_log2_rejected() {
        let mut table = small_table();
        table.as_log2(1.0).unwrap();
        assert!(matches!(
            table.as_rpkm(),
            Err(DecomposeError::TransformOrder { .. })
        ));
    }

    #[test]
    fn test_rpkm_zero_library_rejected() {
        let mut table = ExpressionTable::from_parts(
            "gene",
            ids(&["g1"]),
            ids(&["s1", "s2"]),
            array![[4.0, 0.0]],
            Some(array![100.0]),
        )
        .unwrap();
        assert!(matches!(
            table.as_rpkm(),
            Err(DecomposeError::ZeroLibrarySize { ref sample }) if sample == "s2"
        ));
    }

    #[test]
    fn test_write_tsv_round_trips_through_load() {
        let table = small_table();
        let out = NamedTempFile::new().unwrap();
        table.write_tsv(out.path()).unwrap();
        let reloaded = ExpressionTable::load(out.path(), TableFormat::Matrix, None).unwrap();
        assert_eq!(reloaded.index_name(), "gene");
        assert_eq!(reloaded.feature_ids(), table.feature_ids());
        assert_eq!(reloaded.data(), table.data());
    }

    #[test]
    fn test_read_id_list_trims() {
        let file = write_temp("  g1 \n\ng2\t\n");
        assert_eq!(read_id_list(file.path()).unwrap(), ids(&["g1", "g2"]));
    }
}
