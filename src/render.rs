//! Drawing an [`Embedding`] colored by an [`Experiment`]'s metadata.
//!
//! Static figures go through `plotters` (SVG, or PNG/JPEG/BMP raster), interactive ones
//! through `plotly` as a standalone HTML page. All display settings live in an explicit
//! [`RenderContext`]; nothing here keeps global plotting state.

use std::fs;
use std::path::Path;

use log::{info, warn};
use plotly::common::color::Rgb;
use plotly::common::{Marker, Mode};
use plotly::layout::Axis;
use plotly::{Layout, Plot, Scatter};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::coloring::{Colormap, HexScale};
use crate::decomposition::{Algorithm, DecomposerParams, Embedding};
use crate::error::{DecomposeError, Result};
use crate::experiment::Experiment;

/// Fill used when a sample has no parsable hex color.
const FALLBACK_RGB: (u8, u8, u8) = (0, 0, 255);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Svg,
    /// PNG, JPEG or BMP, picked by the encoder from the extension.
    Raster,
}

impl ImageFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "svg" => Ok(ImageFormat::Svg),
            "png" | "jpg" | "jpeg" | "bmp" => Ok(ImageFormat::Raster),
            other => Err(DecomposeError::Render(format!(
                "unsupported image extension '{}' for {} (use .svg, .png, .jpg or .bmp)",
                other,
                path.display()
            ))),
        }
    }
}

/// Display settings for one figure.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderContext {
    pub colormap: Colormap,
    pub hex_scale: HexScale,
    pub width: u32,
    pub height: u32,
    pub point_size: u32,
    /// Defaults to the algorithm name.
    pub title: Option<String>,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            colormap: Colormap::Purples,
            hex_scale: HexScale::default(),
            width: 800,
            height: 600,
            point_size: 5,
            title: None,
        }
    }
}

impl RenderContext {
    pub fn colormap(mut self, colormap: Colormap) -> Self {
        self.colormap = colormap;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// One sample's position and fill.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterPoint {
    pub sample: String,
    pub x: f64,
    pub y: f64,
    pub rgb: (u8, u8, u8),
}

/// Points sharing a condition label; one legend entry each.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterGroup {
    pub condition: String,
    pub points: Vec<ScatterPoint>,
}

/// An experiment with its fitted embedding. The embedding is computed once; recoloring
/// only touches metadata.
#[derive(Debug)]
pub struct Plotter {
    experiment: Experiment,
    embedding: Embedding,
    context: RenderContext,
}

impl Plotter {
    /// Fits `algorithm` on the samples x features matrix of `experiment`.
    pub fn fit(
        experiment: Experiment,
        algorithm: Algorithm,
        params: &DecomposerParams,
        context: RenderContext,
    ) -> Result<Self> {
        let x = experiment.counts().samples_by_features();
        info!(
            "Fitting {} on {} samples x {} features.",
            algorithm,
            x.nrows(),
            x.ncols()
        );
        let coords = algorithm.decomposer(params).fit_transform(&x)?;
        let embedding = Embedding::new(algorithm, experiment.counts().sample_ids().to_vec(), coords)?;
        Self::from_embedding(experiment, embedding, context)
    }

    /// Pairs an existing embedding with `experiment`; both must cover the same samples.
    pub fn from_embedding(
        mut experiment: Experiment,
        embedding: Embedding,
        context: RenderContext,
    ) -> Result<Self> {
        if let Some(missing) = experiment
            .metadata()
            .samples()
            .find(|s| embedding.sample(s).is_none())
        {
            return Err(DecomposeError::Render(format!(
                "sample '{}' has metadata but no embedding coordinates",
                missing
            )));
        }
        experiment.assign_hex(context.colormap, context.hex_scale);
        Ok(Self {
            experiment,
            embedding,
            context,
        })
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn into_parts(self) -> (Experiment, Embedding) {
        (self.experiment, self.embedding)
    }

    /// Colors samples by `gene_id`'s expression without refitting.
    pub fn recolor(&mut self, gene_id: &str) {
        self.experiment.recolor(gene_id);
        self.experiment
            .assign_hex(self.context.colormap, self.context.hex_scale);
    }

    fn title(&self) -> String {
        self.context
            .title
            .clone()
            .unwrap_or_else(|| self.embedding.algorithm().name().to_string())
    }

    fn axis_labels(&self) -> (String, String) {
        let stem = match self.embedding.algorithm() {
            Algorithm::Pca => "PC",
            Algorithm::Ica => "IC",
            Algorithm::Tsne => "t-SNE",
        };
        (format!("{} 1", stem), format!("{} 2", stem))
    }

    /// Embedding merged with metadata, grouped by condition in first-appearance order.
    pub fn groups(&self) -> Vec<ScatterGroup> {
        let xy = self.embedding.xy();
        let mut groups: Vec<ScatterGroup> = Vec::new();
        for row in self.experiment.metadata().rows() {
            let Some(i) = self
                .embedding
                .sample_ids()
                .iter()
                .position(|s| s == &row.sample)
            else {
                continue;
            };
            let point = ScatterPoint {
                sample: row.sample.clone(),
                x: xy[i].0,
                y: xy[i].1,
                rgb: row
                    .hex
                    .as_deref()
                    .and_then(parse_hex)
                    .unwrap_or(FALLBACK_RGB),
            };
            match groups.iter_mut().find(|g| g.condition == row.condition) {
                Some(group) => group.points.push(point),
                None => groups.push(ScatterGroup {
                    condition: row.condition.clone(),
                    points: vec![point],
                }),
            }
        }
        groups
    }

    /// Writes a static figure; the format follows the file extension.
    pub fn render(&self, path: &Path) -> Result<()> {
        let format = ImageFormat::from_path(path)?;
        let size = (self.context.width, self.context.height);
        let groups = self.groups();
        match format {
            ImageFormat::Svg => {
                let root = SVGBackend::new(path, size).into_drawing_area();
                self.draw(root, &groups, true)?;
            }
            ImageFormat::Raster => {
                // No font backend is compiled in, so raster figures carry no text.
                warn!(
                    "Raster output {} is drawn without title, axis or legend text; use .svg for a labelled figure.",
                    path.display()
                );
                let root = BitMapBackend::new(path, size).into_drawing_area();
                self.draw(root, &groups, false)?;
            }
        }
        info!("Wrote {} figure to {}.", self.embedding.algorithm(), path.display());
        Ok(())
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: DrawingArea<DB, Shift>,
        groups: &[ScatterGroup],
        with_text: bool,
    ) -> Result<()> {
        root.fill(&WHITE).map_err(render_err)?;
        let (x_range, y_range) = padded_ranges(groups);

        let mut builder = ChartBuilder::on(&root);
        builder.margin(20);
        if with_text {
            builder
                .caption(self.title(), ("sans-serif", 24))
                .x_label_area_size(40)
                .y_label_area_size(50);
        }
        let mut chart = builder
            .build_cartesian_2d(x_range, y_range)
            .map_err(render_err)?;

        if with_text {
            let (x_desc, y_desc) = self.axis_labels();
            chart
                .configure_mesh()
                .x_desc(x_desc)
                .y_desc(y_desc)
                .draw()
                .map_err(render_err)?;
        }

        let size = self.context.point_size;
        for group in groups {
            let (r, g, b) = group.points.first().map_or(FALLBACK_RGB, |p| p.rgb);
            let legend_color = RGBColor(r, g, b);
            let series = chart
                .draw_series(group.points.iter().map(|p| {
                    let (r, g, b) = p.rgb;
                    Circle::new((p.x, p.y), size, RGBColor(r, g, b).filled())
                }))
                .map_err(render_err)?;
            if with_text {
                series
                    .label(group.condition.as_str())
                    .legend(move |(x, y)| Circle::new((x, y), size, legend_color.filled()));
            }
        }

        if with_text {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(render_err)?;
        }
        root.present().map_err(render_err)?;
        Ok(())
    }

    /// Writes a standalone HTML scatter, one trace per condition, hover text = sample id.
    pub fn render_interactive(&self, path: &Path) -> Result<()> {
        let mut plot = Plot::new();
        for group in self.groups() {
            let xs: Vec<f64> = group.points.iter().map(|p| p.x).collect();
            let ys: Vec<f64> = group.points.iter().map(|p| p.y).collect();
            let samples: Vec<String> = group.points.iter().map(|p| p.sample.clone()).collect();
            let colors: Vec<Rgb> = group
                .points
                .iter()
                .map(|p| Rgb::new(p.rgb.0, p.rgb.1, p.rgb.2))
                .collect();
            let trace = Scatter::new(xs, ys)
                .mode(Mode::Markers)
                .name(group.condition.as_str())
                .text_array(samples)
                .marker(
                    Marker::new()
                        .size(self.context.point_size as usize * 2)
                        .color_array(colors),
                );
            plot.add_trace(trace);
        }

        let (x_desc, y_desc) = self.axis_labels();
        let layout = Layout::new()
            .title(self.title().as_str())
            .x_axis(Axis::new().title(x_desc.as_str()))
            .y_axis(Axis::new().title(y_desc.as_str()));
        plot.set_layout(layout);

        fs::write(path, plot.to_html())?;
        info!("Wrote interactive {} figure to {}.", self.embedding.algorithm(), path.display());
        Ok(())
    }
}

fn render_err<E: std::fmt::Display>(e: E) -> DecomposeError {
    DecomposeError::Render(e.to_string())
}

/// `#rrggbb` to an RGB triple.
pub fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Data ranges padded by 10% on each side, widened when degenerate.
fn padded_ranges(groups: &[ScatterGroup]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let points = groups.iter().flat_map(|g| g.points.iter());
    let (mut x_min, mut x_max, mut y_min, mut y_max) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }
    (pad(x_min, x_max), pad(y_min, y_max))
}

fn pad(min: f64, max: f64) -> std::ops::Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return -1.0..1.0;
    }
    let span = max - min;
    let margin = if span > 0.0 { span * 0.1 } else { 1.0 };
    (min - margin)..(max + margin)
}
