//! Figure geometry for the stacked pileup figure. All lengths are inches;
//! panel rectangles are fractions of the figure, origin at the bottom left.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Physical margins and panel sizes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Left margin (y labels).
    pub left: f64,
    pub axis_width: f64,
    pub right: f64,
    pub bottom: f64,
    pub pileup_height: f64,
    pub top: f64,
    /// Gap between the gene track and the lowest pileup panel.
    pub gene_gap: f64,
    /// Gap between pileup panels; also the mappability track height.
    pub panel_gap: f64,
    pub transcript_height: f64,
    pub transcript_gap: f64,
    pub mappability_bottom: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            left: 0.75,
            axis_width: 4.5,
            right: 0.5,
            bottom: 0.5,
            pileup_height: 1.5,
            top: 0.25,
            gene_gap: 0.2,
            panel_gap: 0.12,
            transcript_height: 0.08,
            transcript_gap: 0.01,
            mappability_bottom: 0.25,
        }
    }
}

impl LayoutConfig {
    /// Reads overrides from a TOML/JSON/YAML file; missing keys keep defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize::<LayoutConfig>()?)
    }

    /// Gene track height for `transcripts` isoforms.
    pub fn gene_height(&self, transcripts: usize) -> f64 {
        let nt = transcripts.max(1) as f64;
        self.transcript_height * nt + self.transcript_gap * (nt - 1.0)
    }
}

/// Axes rectangle as `[left, bottom, width, height]` figure fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxesRect {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl AxesRect {
    /// `(x, y_top, width, height)` in pixels of a `size` figure, y down.
    pub fn to_pixels(&self, size: (u32, u32)) -> (i32, i32, u32, u32) {
        let (w, h) = (size.0 as f64, size.1 as f64);
        let x = (self.left * w).round() as i32;
        let y = ((1.0 - self.bottom - self.height) * h).round() as i32;
        (
            x,
            y,
            (self.width * w).round().max(1.0) as u32,
            (self.height * h).round().max(1.0) as u32,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelLayout {
    pub fig_width: f64,
    pub fig_height: f64,
    /// Bottom to top.
    pub pileups: Vec<AxesRect>,
    pub gene: AxesRect,
    pub mappability: Option<AxesRect>,
}

impl PanelLayout {
    pub fn compute(pileups: usize, transcripts: usize, mappability: bool, cfg: &LayoutConfig) -> Self {
        let n = pileups as f64;
        let gene_height = cfg.gene_height(transcripts);
        let fw = cfg.left + cfg.axis_width + cfg.right;
        let mut fh = cfg.bottom
            + gene_height
            + cfg.gene_gap
            + (n - 1.0).max(0.0) * cfg.panel_gap
            + n * cfg.pileup_height
            + cfg.top;
        if mappability {
            fh += cfg.panel_gap;
        }

        let rect = |bottom: f64, height: f64| AxesRect {
            left: cfg.left / fw,
            bottom: bottom / fh,
            width: cfg.axis_width / fw,
            height: height / fh,
        };
        let first = cfg.bottom + gene_height + cfg.gene_gap;
        let pileup_rects = (0..pileups)
            .map(|k| rect(first + k as f64 * (cfg.panel_gap + cfg.pileup_height), cfg.pileup_height))
            .collect();

        Self {
            fig_width: fw,
            fig_height: fh,
            pileups: pileup_rects,
            gene: rect(cfg.bottom, gene_height),
            mappability: mappability.then(|| rect(cfg.mappability_bottom, cfg.panel_gap)),
        }
    }

    /// Figure size in pixels at `dpi`.
    pub fn pixel_size(&self, dpi: f64) -> (u32, u32) {
        (
            (self.fig_width * dpi).round() as u32,
            (self.fig_height * dpi).round() as u32,
        )
    }
}

/// Vertices of the downward triangle marking `x` under a panel whose axes
/// span `x_span` by `y_range` data units and `aspect = height / width`
/// inches. Height is 4% of the y span, offset 1% below the axis; the half
/// width is scaled so the triangle has the same physical shape on every
/// panel.
pub fn variant_marker(x: f64, x_span: f64, y_range: (f64, f64), aspect: f64) -> [(f64, f64); 3] {
    let y_span = y_range.1 - y_range.0;
    let h = 0.04 * y_span;
    let b = h / 3f64.sqrt() * aspect * x_span / y_span;
    let base = y_range.0 - h - 0.01 * y_span;
    let tip = y_range.0 - 0.01 * y_span;
    [(x - b, base), (x + b, base), (x, tip)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn figure_size_matches_panel_counts() {
        let cfg = LayoutConfig::default();
        let layout = PanelLayout::compute(2, 3, false, &cfg);
        assert_approx_eq!(layout.fig_width, 5.75);
        // 0.5 + (0.24 + 0.02) + 0.2 + 0.12 + 3.0 + 0.25
        assert_approx_eq!(layout.fig_height, 4.33);
        assert_eq!(layout.pileups.len(), 2);
        assert!(layout.mappability.is_none());

        let with_map = PanelLayout::compute(2, 3, true, &cfg);
        assert_approx_eq!(with_map.fig_height, 4.45);
        assert!(with_map.mappability.is_some());
    }

    #[test]
    fn panels_stack_upwards_with_gaps() {
        let cfg = LayoutConfig::default();
        let layout = PanelLayout::compute(3, 1, false, &cfg);
        let fh = layout.fig_height;
        assert_approx_eq!(layout.gene.bottom * fh, 0.5);
        assert_approx_eq!(layout.gene.height * fh, 0.08);
        assert_approx_eq!(layout.pileups[0].bottom * fh, 0.5 + 0.08 + 0.2);
        for w in layout.pileups.windows(2) {
            let gap = (w[1].bottom - (w[0].bottom + w[0].height)) * fh;
            assert_approx_eq!(gap, 0.12);
        }
        let top = layout.pileups[2].bottom + layout.pileups[2].height;
        assert_approx_eq!((1.0 - top) * fh, 0.25);
        assert_approx_eq!(layout.pileups[0].left * layout.fig_width, 0.75);
    }

    #[test]
    fn marker_shape_is_scale_free() {
        let aspect = 1.5 / 4.5;
        // physical size: data size / span * axis length
        let physical = |x_span: f64, y_span: f64| {
            let v = variant_marker(10.0, x_span, (0.0, y_span), aspect);
            let half_width = (v[1].0 - v[0].0) / 2.0 / x_span * 4.5;
            let height = (v[2].1 - v[0].1) / y_span * 1.5;
            (half_width, height)
        };
        let (b1, h1) = physical(1000.0, 5.0);
        let (b2, h2) = physical(37.0, 9000.0);
        assert_approx_eq!(b1, b2, 1e-12);
        assert_approx_eq!(h1, h2, 1e-12);
        assert_approx_eq!(h1, 0.06, 1e-12);
        // equilateral
        assert_approx_eq!(2.0 * b1, h1 * 2.0 / 3f64.sqrt(), 1e-12);
    }

    #[test]
    fn marker_sits_below_axis() {
        let v = variant_marker(3.0, 10.0, (0.0, 100.0), 1.0);
        assert_approx_eq!(v[2].1, -1.0);
        assert_approx_eq!(v[0].1, -5.0);
        assert_eq!(v[2].0, 3.0);
    }

    #[test]
    fn pixel_rect_flips_y() {
        let rect = AxesRect { left: 0.1, bottom: 0.2, width: 0.5, height: 0.3 };
        assert_eq!(rect.to_pixels((1000, 500)), (100, 250, 500, 150));
    }
}
