use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{PileupError, Result};

/// Raw per-position depths, one column per sample, all columns sharing
/// `positions`. Column order is the order samples were added.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupTable {
    pub chrom: String,
    pub positions: Vec<u64>,
    pub samples: Vec<String>,
    pub depths: Vec<Vec<u32>>,
}

/// Column label of a floating-point profile table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TraceLabel {
    Sample(String),
    Dosage(i32),
}

impl TraceLabel {
    pub fn dosage(&self) -> Option<i32> {
        match self {
            TraceLabel::Dosage(d) => Some(*d),
            TraceLabel::Sample(_) => None,
        }
    }
}

impl fmt::Display for TraceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLabel::Sample(s) => write!(f, "{}", s),
            TraceLabel::Dosage(d) => write!(f, "{}", d),
        }
    }
}

impl From<&str> for TraceLabel {
    fn from(s: &str) -> Self {
        TraceLabel::Sample(s.to_string())
    }
}

impl From<i32> for TraceLabel {
    fn from(d: i32) -> Self {
        TraceLabel::Dosage(d)
    }
}

/// Normalized or grouped profiles: labeled `f64` columns over a shared
/// position index.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    pub chrom: String,
    pub positions: Vec<u64>,
    pub labels: Vec<TraceLabel>,
    pub values: Vec<Vec<f64>>,
}

impl PileupTable {
    pub fn new(chrom: impl Into<String>, positions: Vec<u64>) -> Self {
        Self {
            chrom: chrom.into(),
            positions,
            samples: Vec::new(),
            depths: Vec::new(),
        }
    }

    pub fn push_column(&mut self, sample: impl Into<String>, depths: Vec<u32>) -> Result<()> {
        let sample = sample.into();
        if depths.len() != self.positions.len() {
            return Err(PileupError::ShapeMismatch(format!(
                "column {} has {} rows, index has {}",
                sample,
                depths.len(),
                self.positions.len()
            )));
        }
        self.samples.push(sample);
        self.depths.push(depths);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.positions.len()
    }

    pub fn n_cols(&self) -> usize {
        self.samples.len()
    }

    pub fn column(&self, sample: &str) -> Option<&[u32]> {
        self.samples
            .iter()
            .position(|s| s == sample)
            .map(|i| self.depths[i].as_slice())
    }

    /// Row keys in `chrom_position` form.
    pub fn row_keys(&self) -> Vec<String> {
        self.positions
            .iter()
            .map(|p| format!("{}_{}", self.chrom, p))
            .collect()
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header: Vec<String> = self.samples.clone();
        let columns: Vec<Vec<String>> = self
            .depths
            .iter()
            .map(|c| c.iter().map(|v| v.to_string()).collect())
            .collect();
        write_columns(path.as_ref(), &self.chrom, &self.positions, &header, &columns)
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = read_columns(path)?;
        let mut table = PileupTable::new(raw.chrom, raw.positions);
        for (name, column) in raw.header.into_iter().zip(raw.columns) {
            let depths = column
                .iter()
                .map(|v| v.parse::<u32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| table_error(path, format!("column {}: {}", name, e)))?;
            table.push_column(name, depths)?;
        }
        Ok(table)
    }
}

impl ProfileTable {
    pub fn new(chrom: impl Into<String>, positions: Vec<u64>) -> Self {
        Self {
            chrom: chrom.into(),
            positions,
            labels: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push_column(&mut self, label: impl Into<TraceLabel>, values: Vec<f64>) -> Result<()> {
        let label = label.into();
        if values.len() != self.positions.len() {
            return Err(PileupError::ShapeMismatch(format!(
                "column {} has {} rows, index has {}",
                label,
                values.len(),
                self.positions.len()
            )));
        }
        self.labels.push(label);
        self.values.push(values);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.positions.len()
    }

    pub fn n_cols(&self) -> usize {
        self.labels.len()
    }

    pub fn column(&self, label: &TraceLabel) -> Option<&[f64]> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.values[i].as_slice())
    }

    /// All columns carrying `name`; remapped sample ids may repeat.
    pub fn columns_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [f64]> + 'a {
        self.labels
            .iter()
            .zip(self.values.iter())
            .filter(move |(l, _)| matches!(l, TraceLabel::Sample(s) if s == name))
            .map(|(_, v)| v.as_slice())
    }

    /// True when every column is labeled by a genotype dosage.
    pub fn is_dosage_labeled(&self) -> bool {
        !self.labels.is_empty() && self.labels.iter().all(|l| l.dosage().is_some())
    }

    /// Per-column total across the region.
    pub fn sums(&self) -> Vec<f64> {
        self.values.iter().map(|c| c.iter().sum()).collect()
    }

    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_value(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header: Vec<String> = self.labels.iter().map(|l| l.to_string()).collect();
        let columns: Vec<Vec<String>> = self
            .values
            .iter()
            .map(|c| c.iter().map(|v| format!("{}", v)).collect())
            .collect();
        write_columns(path.as_ref(), &self.chrom, &self.positions, &header, &columns)
    }

    /// Reads a table written by `write_csv`. Headers that all parse as
    /// integers are read back as dosage labels.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = read_columns(path)?;
        let dosages: Option<Vec<i32>> = raw.header.iter().map(|h| h.parse::<i32>().ok()).collect();
        let labels: Vec<TraceLabel> = match dosages {
            Some(d) if !d.is_empty() => d.into_iter().map(TraceLabel::Dosage).collect(),
            _ => raw.header.iter().map(|h| TraceLabel::Sample(h.clone())).collect(),
        };
        let mut table = ProfileTable::new(raw.chrom, raw.positions);
        for (label, column) in labels.into_iter().zip(raw.columns) {
            let values = column
                .iter()
                .map(|v| v.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| table_error(path, format!("column {}: {}", label, e)))?;
            table.push_column(label, values)?;
        }
        Ok(table)
    }
}

fn table_error(path: &Path, message: String) -> PileupError {
    PileupError::TableFormat {
        path: path.display().to_string(),
        message,
    }
}

struct RawColumns {
    chrom: String,
    positions: Vec<u64>,
    header: Vec<String>,
    columns: Vec<Vec<String>>,
}

fn write_columns(
    path: &Path,
    chrom: &str,
    positions: &[u64],
    header: &[String],
    columns: &[Vec<String>],
) -> Result<()> {
    let file = File::create(path)?;
    let mut output = BufWriter::with_capacity(1024 * 1024, file);
    writeln!(output, "chrom,position,{}", header.join(","))?;
    for (row, pos) in positions.iter().enumerate() {
        write!(output, "{},{}", chrom, pos)?;
        for column in columns {
            write!(output, ",{}", column[row])?;
        }
        writeln!(output)?;
    }
    output.flush()?;
    Ok(())
}

fn read_columns(path: &Path) -> Result<RawColumns> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| table_error(path, "empty file".to_string()))??;
    let fields: Vec<&str> = header_line.trim_end().split(',').collect();
    if fields.len() < 2 || fields[0] != "chrom" || fields[1] != "position" {
        return Err(table_error(
            path,
            "header must start with chrom,position".to_string(),
        ));
    }
    let header: Vec<String> = fields[2..].iter().map(|s| s.to_string()).collect();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); header.len()];
    let mut positions = Vec::new();
    let mut chrom = String::new();

    for (line_num, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != header.len() + 2 {
            return Err(table_error(
                path,
                format!("line {} has {} fields, expected {}", line_num + 2, fields.len(), header.len() + 2),
            ));
        }
        if chrom.is_empty() {
            chrom = fields[0].to_string();
        }
        let pos = fields[1]
            .parse::<u64>()
            .map_err(|e| table_error(path, format!("line {}: {}", line_num + 2, e)))?;
        positions.push(pos);
        for (column, value) in columns.iter_mut().zip(&fields[2..]) {
            column.push(value.to_string());
        }
    }

    Ok(RawColumns {
        chrom,
        positions,
        header,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pileup_csv_keeps_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.csv");
        let mut table = PileupTable::new("chr2", vec![100, 101, 102]);
        table.push_column("S2", vec![1, 2, 3]).unwrap();
        table.push_column("S1", vec![0, 0, 7]).unwrap();
        table.write_csv(&path).unwrap();

        let back = PileupTable::read_csv(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.row_keys()[2], "chr2_102");
    }

    #[test]
    fn profile_csv_detects_dosage_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grouped.csv");
        let mut table = ProfileTable::new("chr2", vec![5, 6]);
        table.push_column(0, vec![1.5, 2.0]).unwrap();
        table.push_column(2, vec![0.25, 0.0]).unwrap();
        table.write_csv(&path).unwrap();

        let back = ProfileTable::read_csv(&path).unwrap();
        assert!(back.is_dosage_labeled());
        assert_eq!(back.column(&TraceLabel::Dosage(2)).unwrap(), &[0.25, 0.0]);
    }

    #[test]
    fn push_column_rejects_wrong_length() {
        let mut table = ProfileTable::new("chr1", vec![1, 2]);
        assert!(table.push_column("A", vec![1.0]).is_err());
    }
}
