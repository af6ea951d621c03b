use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use bigtools::BigWigRead;

use crate::error::{PileupError, Result};

fn is_bigwig(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref e) if e == "bw" || e == "bigwig"
    )
}

/// Per-position score over `start..=end` (1-based) from a bigWig or a
/// bedGraph file. Positions without data are 0.
pub fn read_track(path: &Path, chrom: &str, start: u64, end: u64) -> Result<Vec<f64>> {
    let mut values = vec![0.0; (end + 1 - start) as usize];
    let start0 = start - 1;
    let mut fill = |iv_start: u64, iv_end: u64, value: f64| {
        let s = iv_start.max(start0);
        let e = iv_end.min(end);
        for pos in s..e {
            values[(pos - start0) as usize] = value;
        }
    };

    if is_bigwig(path) {
        let path_str = path.to_string_lossy();
        let mut reader = BigWigRead::open_file(&*path_str)
            .map_err(|e| PileupError::Coverage(format!("{}: {}", path_str, e)))?;
        let intervals = reader
            .get_interval(chrom, start0 as u32, end as u32)
            .map_err(|e| PileupError::Coverage(e.to_string()))?;
        for interval in intervals {
            let v = interval.map_err(|e| PileupError::Coverage(e.to_string()))?;
            fill(v.start as u64, v.end as u64, v.value as f64);
        }
    } else {
        let reader = BufReader::new(File::open(path)?);
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.starts_with('#') || line.starts_with("track") || line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 || fields[0] != chrom {
                continue;
            }
            let parsed = (
                fields[1].parse::<u64>(),
                fields[2].parse::<u64>(),
                fields[3].trim().parse::<f64>(),
            );
            match parsed {
                (Ok(s), Ok(e), Ok(v)) => fill(s, e, v),
                _ => {
                    return Err(PileupError::Coverage(format!(
                        "{} line {}: malformed bedGraph record",
                        path.display(),
                        line_num + 1
                    )))
                }
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bedgraph_fills_overlapping_positions() {
        let mut file = tempfile::Builder::new().suffix(".bedGraph").tempfile().unwrap();
        writeln!(file, "track type=bedGraph").unwrap();
        writeln!(file, "chr1\t0\t12\t0.5").unwrap();
        writeln!(file, "chr1\t12\t20\t1").unwrap();
        writeln!(file, "chr2\t0\t20\t9").unwrap();
        file.flush().unwrap();

        // positions 10..=14, 1-based
        let track = read_track(file.path(), "chr1", 10, 14).unwrap();
        assert_eq!(track, vec![0.5, 0.5, 0.5, 1.0, 1.0]);
    }
}
