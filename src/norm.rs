use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{PileupError, Result};
use crate::table::{PileupTable, ProfileTable, TraceLabel};

/// Sample id -> total mapped reads.
pub type LibrarySizeMap = HashMap<String, u64>;

/// Maps a raw sample code to its display id.
pub type IdMap<'a> = &'a dyn Fn(&str) -> String;

/// Opaque profile transform, e.g. confound removal. Must return a table with
/// the same index and columns.
pub trait ProfileTransform {
    fn transform(&self, table: &ProfileTable) -> Result<ProfileTable>;
}

/// Keeps the first two hyphen-delimited segments: `GTEX-1117F-0003-SM-58Q7G`
/// becomes `GTEX-1117F`.
pub fn default_id_map(sample_id: &str) -> String {
    sample_id.split('-').take(2).collect::<Vec<_>>().join("-")
}

pub fn identity_id_map(sample_id: &str) -> String {
    sample_id.to_string()
}

/// Converts raw depth to reads per million mapped reads, relabels columns
/// through `id_map` (default [`default_id_map`]) and applies `covariates` if
/// given. Relabeling may produce duplicate labels; they are kept as-is.
pub fn normalize(
    table: &PileupTable,
    libsizes: &LibrarySizeMap,
    covariates: Option<&dyn ProfileTransform>,
    id_map: Option<IdMap<'_>>,
) -> Result<ProfileTable> {
    let id_map: IdMap<'_> = id_map.unwrap_or(&default_id_map);
    let mut rpm = ProfileTable::new(table.chrom.clone(), table.positions.clone());

    for (sample, depths) in table.samples.iter().zip(&table.depths) {
        let libsize = *libsizes
            .get(sample)
            .ok_or_else(|| PileupError::MissingLibrarySize(sample.clone()))?;
        if libsize == 0 {
            return Err(PileupError::ZeroLibrarySize(sample.clone()));
        }
        let libsize = libsize as f64;
        let values = depths
            .iter()
            .map(|&d| d as f64 / libsize * 1e6)
            .collect();
        rpm.push_column(TraceLabel::Sample(id_map(sample)), values)?;
    }

    match covariates {
        Some(transform) => {
            let transformed = transform.transform(&rpm)?;
            if transformed.positions != rpm.positions || transformed.labels != rpm.labels {
                return Err(PileupError::ShapeMismatch(
                    "profile transform changed the table index or columns".to_string(),
                ));
            }
            Ok(transformed)
        }
        None => Ok(rpm),
    }
}

/// Reads `sample<TAB or ,>total_reads` lines. A header line whose second
/// field is not numeric is skipped.
pub fn read_library_sizes<P: AsRef<Path>>(path: P) -> Result<LibrarySizeMap> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut sizes = LibrarySizeMap::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(|c| c == '\t' || c == ',').collect();
        if fields.len() < 2 {
            return Err(PileupError::TableFormat {
                path: path.display().to_string(),
                message: format!("line {} needs sample and library size", line_num + 1),
            });
        }
        match fields[1].trim().parse::<f64>() {
            Ok(v) => {
                sizes.insert(fields[0].trim().to_string(), v.round() as u64);
            }
            Err(_) if line_num == 0 => continue,
            Err(e) => {
                return Err(PileupError::TableFormat {
                    path: path.display().to_string(),
                    message: format!("line {}: {}", line_num + 1, e),
                })
            }
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn raw() -> PileupTable {
        let mut t = PileupTable::new("chr1", vec![1, 2]);
        t.push_column("A", vec![10, 20]).unwrap();
        t.push_column("B", vec![30, 40]).unwrap();
        t
    }

    fn libsizes() -> LibrarySizeMap {
        LibrarySizeMap::from([("A".to_string(), 1_000_000), ("B".to_string(), 2_000_000)])
    }

    #[test]
    fn rates_per_million() {
        let rpm = normalize(&raw(), &libsizes(), None, Some(&identity_id_map)).unwrap();
        assert_eq!(rpm.column(&"A".into()).unwrap(), &[10.0, 20.0]);
        let b = rpm.column(&"B".into()).unwrap();
        assert_approx_eq!(b[0], 15.0);
        assert_approx_eq!(b[1], 20.0);
    }

    #[test]
    fn default_map_collapses_to_two_segments() {
        assert_eq!(default_id_map("GTEX-1117F-0003-SM-58Q7G"), "GTEX-1117F");
        assert_eq!(default_id_map("S1"), "S1");
    }

    #[test]
    fn remapping_keeps_duplicates() {
        let mut t = PileupTable::new("chr1", vec![1]);
        t.push_column("GTEX-A-1", vec![1]).unwrap();
        t.push_column("GTEX-A-2", vec![3]).unwrap();
        let sizes = LibrarySizeMap::from([("GTEX-A-1".to_string(), 1_000_000), ("GTEX-A-2".to_string(), 1_000_000)]);
        let rpm = normalize(&t, &sizes, None, None).unwrap();
        assert_eq!(rpm.n_cols(), 2);
        assert_eq!(rpm.columns_named("GTEX-A").count(), 2);
    }

    #[test]
    fn missing_or_zero_library_size_fails() {
        let mut sizes = libsizes();
        sizes.remove("B");
        assert!(matches!(
            normalize(&raw(), &sizes, None, None),
            Err(PileupError::MissingLibrarySize(s)) if s == "B"
        ));
        sizes.insert("B".to_string(), 0);
        assert!(matches!(
            normalize(&raw(), &sizes, None, None),
            Err(PileupError::ZeroLibrarySize(_))
        ));
    }

    struct DropColumn;
    impl ProfileTransform for DropColumn {
        fn transform(&self, table: &ProfileTable) -> Result<ProfileTable> {
            let mut t = table.clone();
            t.labels.pop();
            t.values.pop();
            Ok(t)
        }
    }

    #[test]
    fn transform_must_preserve_shape() {
        let err = normalize(&raw(), &libsizes(), Some(&DropColumn), None).unwrap_err();
        assert!(matches!(err, PileupError::ShapeMismatch(_)));
    }
}
