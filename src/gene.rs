//! Gene model: transcript structure, intron-collapsed display coordinates and
//! the isoform track drawing used under the pileup panels.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use bio::io::gff;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::coverage::read_track;
use crate::error::{plot_error, PileupError, Result};

/// Display settings for [`GeneModel::draw`].
#[derive(Debug, Clone)]
pub struct GeneStyle {
    pub color: RGBColor,
    /// Intron line thickness as a fraction of the row height.
    pub intron_width: f64,
    /// Genomic `(start, end)` introns drawn in red.
    pub highlight_introns: Vec<(u64, u64)>,
    /// Genomic `(start, end)` introns drawn in blue.
    pub highlight_introns2: Vec<(u64, u64)>,
}

impl Default for GeneStyle {
    fn default() -> Self {
        Self {
            color: BLACK,
            intron_width: 0.1,
            highlight_introns: Vec::new(),
            highlight_introns2: Vec::new(),
        }
    }
}

/// Everything the plot composer needs from a gene annotation.
pub trait GeneModel {
    fn name(&self) -> &str;
    fn chrom(&self) -> &str;
    fn start_pos(&self) -> u64;
    fn end_pos(&self) -> u64;
    fn transcript_count(&self) -> usize;

    /// Compress introns longer than `max_intron` bp to `max_intron`.
    fn set_plot_coords(&mut self, max_intron: u64);

    /// Offset from `start_pos` -> collapsed display coordinate.
    fn collapse_offset(&self, offset: f64) -> f64;

    fn map_pos(&self, pos: u64) -> f64 {
        self.collapse_offset(pos as f64 - self.start_pos() as f64)
    }

    /// Genomic positions of collapsed exon boundaries, ascending.
    fn collapsed_exon_bounds(&self) -> Vec<u64>;

    /// Draws the isoforms filling `area`, with `x_range` in display units.
    fn draw<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        x_range: Range<f64>,
        style: &GeneStyle,
    ) -> Result<()>;

    /// Per-position score of a genome-wide track over `start_pos..=end_pos`.
    fn coverage(&self, source: &Path) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub id: String,
    /// 1-based inclusive exons, sorted by start.
    pub exons: Vec<(u64, u64)>,
}

impl Transcript {
    pub fn introns(&self) -> Vec<(u64, u64)> {
        self.exons
            .windows(2)
            .filter(|w| w[1].0 > w[0].1 + 1)
            .map(|w| (w[0].1 + 1, w[1].0 - 1))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Gene {
    pub id: String,
    pub name: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub transcripts: Vec<Transcript>,
    /// `(offset, display)` knots of the collapsed map, ascending.
    knots: Vec<(f64, f64)>,
}

impl Gene {
    pub fn new(id: &str, name: &str, chrom: &str, mut transcripts: Vec<Transcript>) -> Result<Self> {
        for t in transcripts.iter_mut() {
            t.exons.sort();
        }
        let start = transcripts
            .iter()
            .flat_map(|t| t.exons.iter().map(|e| e.0))
            .min()
            .ok_or_else(|| PileupError::GeneNotFound(id.to_string()))?;
        let end = transcripts
            .iter()
            .flat_map(|t| t.exons.iter().map(|e| e.1))
            .max()
            .unwrap_or(start);
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            chrom: chrom.to_string(),
            start,
            end,
            transcripts,
            knots: Vec::new(),
        })
    }

    /// Loads the transcripts of `target` (gene id, versionless gene id, or
    /// gene name) from a GTF file.
    pub fn from_gtf<P: AsRef<Path>>(path: P, target: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = gff::Reader::from_file(path, gff::GffType::GTF2).map_err(std::io::Error::other)?;
        let mut transcripts: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();
        let mut found: Option<(String, String, String)> = None;

        for record in reader.records() {
            let record = record.map_err(|e| PileupError::TableFormat {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            if record.feature_type() != "exon" {
                continue;
            }
            let attrs = record.attributes();
            let gene_id = attrs.get("gene_id").map(|s| s.as_str()).unwrap_or("");
            let gene_name = attrs.get("gene_name").map(|s| s.as_str()).unwrap_or("");
            let versionless = gene_id.split('.').next().unwrap_or(gene_id);
            if gene_id != target && versionless != target && gene_name != target {
                continue;
            }
            if found.is_none() {
                let name = if gene_name.is_empty() { gene_id } else { gene_name };
                found = Some((gene_id.to_string(), name.to_string(), record.seqname().to_string()));
            }
            let transcript_id = attrs
                .get("transcript_id")
                .cloned()
                .unwrap_or_else(|| gene_id.to_string());
            transcripts
                .entry(transcript_id)
                .or_default()
                .push((*record.start(), *record.end()));
        }

        let (id, name, chrom) = found.ok_or_else(|| PileupError::GeneNotFound(target.to_string()))?;
        let transcripts = transcripts
            .into_iter()
            .map(|(id, exons)| Transcript { id, exons })
            .collect();
        Gene::new(&id, &name, &chrom, transcripts)
    }

    /// Union of all exons as offsets from `start`, half-open.
    fn merged_exon_offsets(&self) -> Vec<(u64, u64)> {
        let mut exons: Vec<(u64, u64)> = self
            .transcripts
            .iter()
            .flat_map(|t| t.exons.iter())
            .map(|&(s, e)| (s - self.start, e + 1 - self.start))
            .collect();
        exons.sort();
        let mut merged: Vec<(u64, u64)> = Vec::new();
        for (s, e) in exons {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        merged
    }

    fn draw_span<DB: DrawingBackend>(
        &self,
        chart: &mut ChartContext<'_, DB, Cartesian2d<plotters::coord::types::RangedCoordf64, plotters::coord::types::RangedCoordf64>>,
        span: (u64, u64),
        y: f64,
        half_height: f64,
        color: RGBColor,
    ) -> Result<()> {
        let x0 = self.map_pos(span.0);
        let x1 = self.map_pos(span.1 + 1);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(x0, y - half_height), (x1, y + half_height)],
                color.filled(),
            )))
            .map_err(plot_error)?;
        Ok(())
    }
}

impl GeneModel for Gene {
    fn name(&self) -> &str {
        &self.name
    }

    fn chrom(&self) -> &str {
        &self.chrom
    }

    fn start_pos(&self) -> u64 {
        self.start
    }

    fn end_pos(&self) -> u64 {
        self.end
    }

    fn transcript_count(&self) -> usize {
        self.transcripts.len()
    }

    fn set_plot_coords(&mut self, max_intron: u64) {
        let span = self.end + 1 - self.start;
        let mut knots = vec![(0.0, 0.0)];
        let (mut cursor_in, mut cursor_out) = (0u64, 0u64);
        let advance_gap = |to: u64, cursor_in: &mut u64, cursor_out: &mut u64, knots: &mut Vec<(f64, f64)>| {
            if to > *cursor_in {
                *cursor_out += (to - *cursor_in).min(max_intron);
                *cursor_in = to;
                knots.push((*cursor_in as f64, *cursor_out as f64));
            }
        };
        for (s, e) in self.merged_exon_offsets() {
            advance_gap(s, &mut cursor_in, &mut cursor_out, &mut knots);
            cursor_out += e - cursor_in;
            cursor_in = e;
            knots.push((cursor_in as f64, cursor_out as f64));
        }
        advance_gap(span, &mut cursor_in, &mut cursor_out, &mut knots);
        self.knots = knots;
    }

    fn collapse_offset(&self, offset: f64) -> f64 {
        if self.knots.len() < 2 {
            return offset;
        }
        let i = self.knots.partition_point(|k| k.0 <= offset);
        if i == 0 || i >= self.knots.len() {
            // outside the gene: unit slope from the nearest end
            let edge = if i == 0 { self.knots[0] } else { self.knots[self.knots.len() - 1] };
            return offset - edge.0 + edge.1;
        }
        let (a, b) = (self.knots[i - 1], self.knots[i]);
        a.1 + (offset - a.0) * (b.1 - a.1) / (b.0 - a.0)
    }

    fn collapsed_exon_bounds(&self) -> Vec<u64> {
        self.merged_exon_offsets()
            .into_iter()
            .flat_map(|(s, e)| [self.start + s, self.start + e])
            .collect()
    }

    fn draw<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        x_range: Range<f64>,
        style: &GeneStyle,
    ) -> Result<()> {
        let nt = self.transcripts.len().max(1);
        let mut chart = ChartBuilder::on(area)
            .build_cartesian_2d(x_range, -0.5..(nt as f64 - 0.5))
            .map_err(plot_error)?;

        for (i, transcript) in self.transcripts.iter().enumerate() {
            let y = (nt - 1 - i) as f64;
            let (Some(first), Some(last)) = (transcript.exons.first(), transcript.exons.last()) else {
                continue;
            };
            let intron_half = style.intron_width * 0.5 * 0.8;
            self.draw_span(&mut chart, (first.0, last.1), y, intron_half, style.color)?;
            for &exon in &transcript.exons {
                self.draw_span(&mut chart, exon, y, 0.4, style.color)?;
            }
            for intron in transcript.introns() {
                if style.highlight_introns.contains(&intron) {
                    self.draw_span(&mut chart, intron, y, intron_half * 2.0, RED)?;
                } else if style.highlight_introns2.contains(&intron) {
                    self.draw_span(&mut chart, intron, y, intron_half * 2.0, BLUE)?;
                }
            }
        }
        Ok(())
    }

    fn coverage(&self, source: &Path) -> Result<Vec<f64>> {
        read_track(source, &self.chrom, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn gene() -> Gene {
        Gene::new(
            "ENSG1.4",
            "GENE1",
            "chr1",
            vec![
                Transcript { id: "T1".into(), exons: vec![(1000, 1099), (5000, 5099)] },
                Transcript { id: "T2".into(), exons: vec![(1000, 1099), (1200, 1249), (5000, 5099)] },
            ],
        )
        .unwrap()
    }

    #[test]
    fn bounds_come_from_exons() {
        let g = gene();
        assert_eq!((g.start_pos(), g.end_pos()), (1000, 5099));
        assert_eq!(g.transcripts[1].introns(), vec![(1100, 1199), (1250, 4999)]);
    }

    #[test]
    fn identity_before_collapsing() {
        let g = gene();
        assert_eq!(g.map_pos(1500), 500.0);
    }

    #[test]
    fn long_introns_are_capped() {
        let mut g = gene();
        g.set_plot_coords(300);
        // exon 1 kept, 100bp intron kept, exon 2 kept, 3750bp intron -> 300
        assert_eq!(g.map_pos(1000), 0.0);
        assert_eq!(g.map_pos(1100), 100.0);
        assert_eq!(g.map_pos(1250), 250.0);
        assert_eq!(g.map_pos(5000), 550.0);
        assert_eq!(g.map_pos(5099), 649.0);
        // halfway through the collapsed intron
        assert_approx_eq!(g.map_pos(3125), 400.0, 1e-9);
    }

    #[test]
    fn collapsing_is_monotone() {
        let mut g = gene();
        g.set_plot_coords(50);
        let mapped: Vec<f64> = (g.start_pos()..=g.end_pos()).map(|p| g.map_pos(p)).collect();
        assert!(mapped.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn exon_bounds_are_merged() {
        let g = gene();
        assert_eq!(g.collapsed_exon_bounds(), vec![1000, 1100, 1200, 1250, 5000, 5100]);
    }
}
