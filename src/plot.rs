//! Stacked pileup figure: one panel per profile table, the isoform track
//! underneath and an optional mappability strip, all sharing the
//! intron-collapsed x axis of the gene.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::error::{plot_error, PileupError, Result};
use crate::gene::{GeneModel, GeneStyle};
use crate::genotype::VariantId;
use crate::layout::{variant_marker, AxesRect, LayoutConfig, PanelLayout};
use crate::table::{ProfileTable, TraceLabel};

pub const DEFAULT_Y_LABEL: &str = "Mean RPM";

/// Blue, orange and green, for figures with at most three traces.
/// hsv (0.55, 0.75, 0.8), (0.08, 1, 1), (0.3, 0.7, 0.7).
pub const SHORT_CYCLE: [RGBColor; 3] = [
    RGBColor(51, 158, 204),
    RGBColor(255, 122, 0),
    RGBColor(79, 178, 54),
];

pub const DEFAULT_CYCLE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

const SHADE_DARK: RGBColor = RGBColor(204, 204, 204);
const SHADE_LIGHT: RGBColor = RGBColor(230, 230, 230);
const MAPPABILITY_FILL: RGBColor = RGBColor(153, 153, 153);

/// Drawing order of the traces in each panel.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOrder {
    /// Input order, reversed when the first trace has the smaller total so
    /// the largest area is drawn first.
    Additive,
    /// Descending total.
    Sorted,
    /// Input order.
    Unordered,
    /// Label names as typed; matched against the table's own labels, so
    /// `2,0,1` picks dosage columns and numeric sample ids alike.
    Explicit(Vec<String>),
}

impl FromStr for TraceOrder {
    type Err = PileupError;

    /// `additive`, `sorted`, `none`, or a comma-separated label list.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "additive" => Ok(TraceOrder::Additive),
            "sorted" => Ok(TraceOrder::Sorted),
            "none" => Ok(TraceOrder::Unordered),
            "" => Err(PileupError::Plot("empty trace order".to_string())),
            list => Ok(TraceOrder::Explicit(
                list.split(',').map(|l| l.trim().to_string()).collect(),
            )),
        }
    }
}

/// Labels of `table` in drawing order. Explicit names that match no
/// column are dropped.
pub fn trace_order(table: &ProfileTable, order: &TraceOrder) -> Vec<TraceLabel> {
    let sums = table.sums();
    match order {
        TraceOrder::Explicit(names) => names
            .iter()
            .filter_map(|name| table.labels.iter().find(|l| l.to_string() == *name).cloned())
            .collect(),
        TraceOrder::Unordered => table.labels.clone(),
        TraceOrder::Additive => {
            let mut labels = table.labels.clone();
            if let (Some(first), Some(last)) = (sums.first(), sums.last()) {
                if first < last {
                    labels.reverse();
                }
            }
            labels
        }
        TraceOrder::Sorted => {
            let mut idx: Vec<usize> = (0..table.n_cols()).collect();
            idx.sort_by(|&a, &b| sums[b].total_cmp(&sums[a]));
            idx.into_iter().map(|i| table.labels[i].clone()).collect()
        }
    }
}

/// Breakpoints of the alternating background bands.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadeRange {
    Positions(Vec<u64>),
    /// `chr:start-end` or `start-end`.
    Region(String),
}

impl ShadeRange {
    pub fn breakpoints(&self) -> Result<Vec<u64>> {
        match self {
            ShadeRange::Positions(p) => Ok(p.clone()),
            ShadeRange::Region(s) => {
                let span = s.rsplit(':').next().unwrap_or(s);
                span.split('-')
                    .map(|v| {
                        v.trim()
                            .replace(',', "")
                            .parse::<u64>()
                            .map_err(|_| PileupError::InvalidRegion(s.clone()))
                    })
                    .collect()
            }
        }
    }
}

/// Consecutive collapsed-coordinate intervals between `breaks`.
pub fn shade_intervals<G: GeneModel + ?Sized>(breaks: &[u64], gene: &G) -> Vec<(f64, f64)> {
    let start = gene.start_pos() as f64;
    let offsets: Vec<f64> = breaks
        .iter()
        .map(|&b| gene.collapse_offset(b as f64 - start))
        .collect();
    offsets.windows(2).map(|w| (w[0], w[1])).collect()
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    /// `chrom_pos_ref_alt[_build]`; enables genotype legend labels and the title.
    pub variant_id: Option<String>,
    pub order: TraceOrder,
    pub title: Option<String>,
    pub show_variant_pos: bool,
    pub max_intron: u64,
    pub alpha: f64,
    /// Outline width in points.
    pub lw: f64,
    pub outline: bool,
    pub gene_style: GeneStyle,
    pub shade_range: Option<ShadeRange>,
    pub ymax: Option<f64>,
    pub xlim: Option<(f64, f64)>,
    /// Per-panel y labels, bottom to top.
    pub labels: Option<Vec<String>>,
    /// bigWig or bedGraph mappability track.
    pub mappability: Option<PathBuf>,
    pub layout: LayoutConfig,
    pub dpi: f64,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            variant_id: None,
            order: TraceOrder::Additive,
            title: None,
            show_variant_pos: false,
            max_intron: 300,
            alpha: 1.0,
            lw: 0.5,
            outline: false,
            gene_style: GeneStyle::default(),
            shade_range: None,
            ymax: None,
            xlim: None,
            labels: None,
            mappability: None,
            layout: LayoutConfig::default(),
            dpi: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    /// Index of the profile table, 0 at the bottom.
    Pileup(usize),
    Gene,
    Mappability,
}

/// One drawn axes of the figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub kind: PanelKind,
    pub rect: AxesRect,
    pub x_range: Range<f64>,
    pub y_range: Range<f64>,
    /// Legend text of the traces drawn, in drawing order.
    pub traces: Vec<String>,
}

fn points_to_px(points: f64, dpi: f64) -> f64 {
    points * dpi / 72.0
}

fn data_y_range(table: &ProfileTable) -> Range<f64> {
    let lo = table.min_value().min(0.0);
    let hi = table.max_value();
    if hi.is_finite() && hi > lo {
        lo..hi
    } else {
        lo..lo + 1.0
    }
}

fn legend_text(label: &TraceLabel, genotypes: Option<&[String; 3]>) -> String {
    match (label, genotypes) {
        (TraceLabel::Dosage(d), Some(gt)) if (0..3).contains(d) => gt[*d as usize].clone(),
        _ => label.to_string(),
    }
}

/// Backend pixel -> coordinate relative to `root`.
fn to_area<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, p: (i32, i32)) -> (i32, i32) {
    let base = root.get_base_pixel();
    (p.0 - base.0, p.1 - base.1)
}

/// Bottom spine and downward x ticks; the tick labels stay hidden.
fn draw_x_axis<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    chart: &ChartContext<'_, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    x_range: &Range<f64>,
    y: f64,
    ticks: &[f64],
    tick_len: i32,
) -> Result<()> {
    let left = to_area(root, chart.backend_coord(&(x_range.start, y)));
    let right = to_area(root, chart.backend_coord(&(x_range.end, y)));
    root.draw(&PathElement::new(vec![left, right], BLACK.stroke_width(1)))
        .map_err(plot_error)?;
    for &x in ticks.iter().filter(|&&x| x >= x_range.start && x <= x_range.end) {
        let (px, py) = to_area(root, chart.backend_coord(&(x, y)));
        root.draw(&PathElement::new(
            vec![(px, py), (px, py + tick_len)],
            BLACK.stroke_width(1),
        ))
        .map_err(plot_error)?;
    }
    Ok(())
}

/// Horizontal label right-aligned against the left edge of a track.
fn draw_track_label<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    text: &str,
    px: (i32, i32, u32, u32),
    font_px: f64,
) -> Result<()> {
    let style = TextStyle::from(("sans-serif", font_px).into_font()).pos(Pos::new(HPos::Right, VPos::Center));
    root.draw_text(text, &style, (px.0 - 4, px.1 + px.3 as i32 / 2))
        .map_err(plot_error)
}

/// Where the legend of the top panel goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendPlacement {
    /// Upper left corner inside the axes, one entry per line. Used for
    /// genotype labels.
    Inside,
    /// A row just above the axes, filled column by column.
    Above { columns: usize },
}

/// Everything about the figure that does not need a drawing backend:
/// geometry, axis ranges, trace order and legend text.
#[derive(Debug, Clone)]
pub struct FigurePlan {
    pub layout: PanelLayout,
    pub x_range: Range<f64>,
    /// Collapsed exon boundaries.
    pub ticks: Vec<f64>,
    pub shading: Vec<(f64, f64)>,
    pub marker_x: Option<f64>,
    pub title: Option<String>,
    pub legend: LegendPlacement,
    /// Pileup panels bottom to top, then the gene track, then mappability.
    pub panels: Vec<Panel>,
    order: Vec<TraceLabel>,
    mappability: Option<Vec<f64>>,
}

/// `(column, row)` of each of `n` legend entries, filled column by column.
pub fn legend_grid(n: usize, columns: usize) -> Vec<(usize, usize)> {
    let columns = columns.max(1);
    let rows = n.div_ceil(columns).max(1);
    (0..n).map(|i| (i / rows, i % rows)).collect()
}

/// Validates the inputs and works out the figure without drawing it.
/// Collapses the gene's introns as a side effect.
pub fn plan_figure<G: GeneModel>(
    tables: &[ProfileTable],
    gene: &mut G,
    options: &PlotOptions,
) -> Result<FigurePlan> {
    let first = tables
        .first()
        .ok_or_else(|| PileupError::ShapeMismatch("no profile tables to plot".to_string()))?;
    if let Some(labels) = &options.labels {
        if labels.len() != tables.len() {
            return Err(PileupError::ShapeMismatch(format!(
                "{} y labels for {} panels",
                labels.len(),
                tables.len()
            )));
        }
    }
    let variant = options.variant_id.as_deref().map(VariantId::parse).transpose()?;
    let genotypes = match &variant {
        Some(v) if first.is_dosage_labeled() => Some(v.genotype_labels()),
        _ => None,
    };

    gene.set_plot_coords(options.max_intron);
    let gene: &G = gene;
    let layout = PanelLayout::compute(
        tables.len(),
        gene.transcript_count(),
        options.mappability.is_some(),
        &options.layout,
    );

    let x_range = match options.xlim {
        Some((lo, hi)) => lo..hi,
        None => gene.map_pos(gene.start_pos())..gene.map_pos(gene.end_pos()),
    };
    let ticks: Vec<f64> = gene
        .collapsed_exon_bounds()
        .into_iter()
        .map(|p| gene.map_pos(p))
        .collect();
    let shading = match &options.shade_range {
        Some(range) => shade_intervals(&range.breakpoints()?, gene),
        None => Vec::new(),
    };
    let marker_x = match &variant {
        Some(v) if options.show_variant_pos && v.pos >= gene.start_pos() && v.pos <= gene.end_pos() => {
            Some(gene.map_pos(v.pos))
        }
        _ => None,
    };
    let title = options.title.clone().or_else(|| {
        options
            .variant_id
            .as_ref()
            .map(|v| format!("{} :: {}", gene.name(), v))
    });
    let legend = match genotypes {
        Some(_) => LegendPlacement::Inside,
        None => LegendPlacement::Above { columns: 3 },
    };

    let order = trace_order(first, &options.order);
    let mut panels = Vec::with_capacity(tables.len() + 2);
    for (k, (table, rect)) in tables.iter().zip(&layout.pileups).enumerate() {
        let y_range = match options.ymax {
            Some(ymax) => 0.0..ymax,
            None => data_y_range(table),
        };
        let traces = order
            .iter()
            .filter(|label| table.column(label).is_some())
            .map(|label| legend_text(label, genotypes.as_ref()))
            .collect();
        panels.push(Panel {
            kind: PanelKind::Pileup(k),
            rect: *rect,
            x_range: x_range.clone(),
            y_range,
            traces,
        });
    }

    let nt = gene.transcript_count().max(1) as f64;
    panels.push(Panel {
        kind: PanelKind::Gene,
        rect: layout.gene,
        x_range: x_range.clone(),
        y_range: -0.5..nt - 0.5,
        traces: Vec::new(),
    });

    let mappability = match (&options.mappability, layout.mappability) {
        (Some(source), Some(rect)) => {
            let scores = gene.coverage(source)?;
            let hi = scores.iter().copied().fold(0.0, f64::max);
            panels.push(Panel {
                kind: PanelKind::Mappability,
                rect,
                x_range: x_range.clone(),
                y_range: 0.0..if hi > 0.0 { hi } else { 1.0 },
                traces: Vec::new(),
            });
            Some(scores)
        }
        _ => None,
    };

    Ok(FigurePlan {
        layout,
        x_range,
        ticks,
        shading,
        marker_x,
        title,
        legend,
        panels,
        order,
        mappability,
    })
}

/// Legend entries in a grid whose lower left corner sits a little above
/// the top axes.
fn draw_legend_above<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    entries: &[(String, RGBAColor)],
    columns: usize,
    px: (i32, i32, u32, u32),
    dpi: f64,
) -> Result<()> {
    let font_px = points_to_px(9.0, dpi);
    let line = (font_px * 1.15).round() as i32;
    let swatch = (font_px * 0.75).round() as i32;
    let widest = entries.iter().map(|(t, _)| t.chars().count()).max().unwrap_or(0);
    let column_width = swatch * 2 + (widest as f64 * font_px * 0.6).round() as i32;
    let grid = legend_grid(entries.len(), columns);
    let rows = grid.iter().map(|&(_, r)| r + 1).max().unwrap_or(0) as i32;
    let bottom = px.1 - (px.3 as f64 * 0.05).round() as i32;

    let style = TextStyle::from(("sans-serif", font_px).into_font()).pos(Pos::new(HPos::Left, VPos::Center));
    for ((text, color), &(col, row)) in entries.iter().zip(&grid) {
        let x = px.0 + col as i32 * column_width;
        let y = bottom - (rows - row as i32) * line + line / 2;
        root.draw(&Rectangle::new(
            [(x, y - swatch / 2), (x + swatch, y + swatch / 2)],
            color.filled(),
        ))
        .map_err(plot_error)?;
        root.draw_text(text, &style, (x + swatch + swatch / 2, y))
            .map_err(plot_error)?;
    }
    Ok(())
}

/// Draws the figure on `root`, which should have the aspect of the
/// [`PanelLayout`] for these tables. Panels are returned bottom to top,
/// then the gene track, then the mappability track.
pub fn render<DB, G>(
    root: &DrawingArea<DB, Shift>,
    tables: &[ProfileTable],
    gene: &mut G,
    options: &PlotOptions,
) -> Result<Vec<Panel>>
where
    DB: DrawingBackend,
    G: GeneModel,
{
    let plan = plan_figure(tables, gene, options)?;
    let gene: &G = gene;
    let FigurePlan {
        layout,
        x_range,
        ticks,
        shading,
        marker_x,
        title,
        legend,
        panels,
        order,
        mappability,
    } = plan;

    let size = root.dim_in_pixel();
    let dpi = size.0 as f64 / layout.fig_width;
    let stroke = (points_to_px(options.lw, dpi).round() as u32).max(1);
    let tick_len = points_to_px(3.0, dpi).round() as i32;
    let aspect = options.layout.pileup_height / options.layout.axis_width;
    let palette: &[RGBColor] = if tables[0].n_cols() <= 3 {
        &SHORT_CYCLE
    } else {
        &DEFAULT_CYCLE
    };
    root.fill(&WHITE).map_err(plot_error)?;

    let top = tables.len() - 1;
    for (k, (table, panel)) in tables.iter().zip(&panels).enumerate() {
        let y_range = panel.y_range.clone();
        let y_label = options
            .labels
            .as_ref()
            .map(|l| l[k].clone())
            .unwrap_or_else(|| DEFAULT_Y_LABEL.to_string());

        // The left margin belongs to the panel so the y axis labels fit.
        let px = panel.rect.to_pixels(size);
        let area = root.clone().shrink((0, px.1), (px.0 as u32 + px.2, px.3));
        let mut chart = ChartBuilder::on(&area)
            .y_label_area_size(px.0)
            .build_cartesian_2d(x_range.clone(), y_range.clone())
            .map_err(plot_error)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .disable_x_axis()
            .y_labels(4)
            .y_desc(y_label)
            .label_style(("sans-serif", points_to_px(10.0, dpi)))
            .axis_desc_style(("sans-serif", points_to_px(12.0, dpi)))
            .draw()
            .map_err(plot_error)?;

        if k == 0 && !shading.is_empty() {
            chart
                .draw_series(shading.iter().enumerate().map(|(i, &(x0, x1))| {
                    let fill = if i % 2 == 0 { SHADE_DARK } else { SHADE_LIGHT };
                    Rectangle::new([(x0, y_range.start), (x1, y_range.end)], fill.filled())
                }))
                .map_err(plot_error)?;
        }

        let series = order.iter().filter_map(|label| table.column(label));
        let mut entries: Vec<(String, RGBAColor)> = Vec::new();
        for (values, text) in series.zip(&panel.traces) {
            let color = palette[entries.len() % palette.len()].mix(options.alpha);
            let points: Vec<(f64, f64)> = table
                .positions
                .iter()
                .map(|&p| gene.map_pos(p))
                .zip(values.iter().copied())
                .collect();
            let anno = if options.outline {
                chart.draw_series(LineSeries::new(points, color.stroke_width(stroke)))
            } else {
                chart.draw_series(AreaSeries::new(points, 0.0, color.filled()))
            }
            .map_err(plot_error)?;

            if k == top && legend == LegendPlacement::Inside {
                let h = (points_to_px(4.0, dpi).round() as i32).max(2);
                anno.label(text.clone())
                    .legend(move |(x, y)| Rectangle::new([(x, y - h), (x + 2 * h, y + h)], color.filled()));
            }
            entries.push((text.clone(), color));
        }

        if k == top && !entries.is_empty() {
            match legend {
                LegendPlacement::Inside => {
                    chart
                        .configure_series_labels()
                        .position(SeriesLabelPosition::UpperLeft)
                        .label_font(("sans-serif", points_to_px(9.0, dpi)))
                        .background_style(WHITE.mix(0.0))
                        .border_style(WHITE.mix(0.0))
                        .draw()
                        .map_err(plot_error)?;
                }
                LegendPlacement::Above { columns } => {
                    draw_legend_above(root, &entries, columns, px, dpi)?;
                }
            }
        }

        draw_x_axis(root, &chart, &x_range, y_range.start, &ticks, tick_len)?;

        if let Some(x) = marker_x {
            let vertices = variant_marker(
                x,
                x_range.end - x_range.start,
                (y_range.start, y_range.end),
                aspect,
            )
            .iter()
            .map(|v| to_area(root, chart.backend_coord(v)))
            .collect::<Vec<_>>();
            root.draw(&Polygon::new(vertices, RED.filled()))
                .map_err(plot_error)?;
        }

        if k == top {
            if let Some(title) = &title {
                // Lift the title over a legend row drawn above the axes.
                let lift = match legend {
                    LegendPlacement::Above { columns } => {
                        let rows = panel.traces.len().div_ceil(columns.max(1)) as f64;
                        (px.3 as f64 * 0.05 + rows * points_to_px(9.0, dpi) * 1.15).round() as i32
                    }
                    LegendPlacement::Inside => 0,
                };
                let style = TextStyle::from(("sans-serif", points_to_px(11.0, dpi)).into_font())
                    .pos(Pos::new(HPos::Center, VPos::Bottom));
                root.draw_text(title, &style, (px.0 + px.2 as i32 / 2, px.1 - 4 - lift))
                    .map_err(plot_error)?;
            }
        }
    }

    let px = layout.gene.to_pixels(size);
    let area = root.clone().shrink((px.0, px.1), (px.2, px.3));
    gene.draw(&area, x_range.clone(), &options.gene_style)?;
    draw_track_label(root, "Isoforms", px, points_to_px(10.0, dpi))?;

    if let (Some(scores), Some(panel)) = (&mappability, panels.iter().find(|p| p.kind == PanelKind::Mappability)) {
        let y_range = panel.y_range.clone();
        let px = panel.rect.to_pixels(size);
        let area = root.clone().shrink((px.0, px.1), (px.2, px.3));
        let mut chart = ChartBuilder::on(&area)
            .build_cartesian_2d(x_range.clone(), y_range.clone())
            .map_err(plot_error)?;
        let points: Vec<(f64, f64)> = (gene.start_pos()..=gene.end_pos())
            .map(|p| gene.map_pos(p))
            .zip(scores.iter().copied())
            .collect();
        chart
            .draw_series(AreaSeries::new(points, 0.0, MAPPABILITY_FILL.filled()))
            .map_err(plot_error)?;
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![
                    (x_range.start, y_range.end),
                    (x_range.start, 0.0),
                    (x_range.end, 0.0),
                ],
                BLACK.stroke_width(1),
            )))
            .map_err(plot_error)?;
        draw_track_label(root, "Map.", px, points_to_px(10.0, dpi))?;
    }

    Ok(panels)
}

/// Renders to `path`: SVG for `.svg`, a bitmap otherwise. The canvas is the
/// layout size in inches times `options.dpi`.
pub fn render_to_file<P, G>(
    path: P,
    tables: &[ProfileTable],
    gene: &mut G,
    options: &PlotOptions,
) -> Result<Vec<Panel>>
where
    P: AsRef<Path>,
    G: GeneModel,
{
    let path = path.as_ref();
    let layout = PanelLayout::compute(
        tables.len(),
        gene.transcript_count(),
        options.mappability.is_some(),
        &options.layout,
    );
    let size = layout.pixel_size(options.dpi);
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("svg"));

    if is_svg {
        let root = SVGBackend::new(path, size).into_drawing_area();
        let panels = render(&root, tables, gene, options)?;
        root.present().map_err(plot_error)?;
        Ok(panels)
    } else {
        let root = BitMapBackend::new(path, size).into_drawing_area();
        let panels = render(&root, tables, gene, options)?;
        root.present().map_err(plot_error)?;
        Ok(panels)
    }
}
