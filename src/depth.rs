//! Per-sample `samtools depth` extraction over one region, merged into a
//! single [`PileupTable`].
//!
//! Every sample is one task on a dedicated rayon pool. Results come back in
//! submission order, so the table's columns follow the input sample order no
//! matter which task finishes first.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::{PileupError, Result};
use crate::progress::DescriptiveProgress;
use crate::region::Region;
use crate::table::PileupTable;

/// Default `samtools depth -d` cap.
pub const DEFAULT_DEPTH_CAP: u32 = 100_000;
/// Minimum mapping quality passed as `-Q`.
pub const MIN_MAPPING_QUALITY: u8 = 255;
pub const DEFAULT_WORKERS: usize = 12;

/// One line of depth output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthRecord {
    pub chrom: String,
    pub pos: u64,
    pub depth: u32,
}

/// Per-position depth for one alignment file.
pub trait DepthSource: Send + Sync {
    fn depth(
        &self,
        region: &Region,
        path: &str,
        index_dir: Option<&Path>,
        depth_cap: u32,
    ) -> Result<Vec<DepthRecord>>;
}

/// Runs the `samtools` executable.
#[derive(Debug, Clone)]
pub struct SamtoolsDepth {
    pub program: PathBuf,
}

impl Default for SamtoolsDepth {
    fn default() -> Self {
        Self {
            program: PathBuf::from("samtools"),
        }
    }
}

impl SamtoolsDepth {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, region: &Region, path: &str, index_dir: Option<&Path>, depth_cap: u32) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("depth")
            .arg("-a")
            .arg("-a")
            .arg("-d")
            .arg(depth_cap.to_string())
            .arg("-Q")
            .arg(MIN_MAPPING_QUALITY.to_string())
            .arg("-r")
            .arg(region.to_string());
        // The index directory only applies to the child; GCS_OAUTH_TOKEN and
        // the rest of the environment are inherited as-is.
        if let Some(dir) = index_dir {
            cmd.arg(resolve_alignment_path(path)).current_dir(dir);
        } else {
            cmd.arg(path);
        }
        cmd
    }
}

impl DepthSource for SamtoolsDepth {
    fn depth(
        &self,
        region: &Region,
        path: &str,
        index_dir: Option<&Path>,
        depth_cap: u32,
    ) -> Result<Vec<DepthRecord>> {
        let output = self
            .command(region, path, index_dir, depth_cap)
            .output()
            .map_err(|source| PileupError::ToolSpawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                format!("exit status {}", output.status)
            };
            return Err(PileupError::ToolFailed {
                sample: path.to_string(),
                status: output.status.to_string(),
                output: detail,
            });
        }

        parse_depth_output(&String::from_utf8_lossy(&output.stdout), path)
    }
}

/// Local relative paths are made absolute so the child can run inside the
/// index directory. URLs (`gs://`, `https://`, ...) pass through unchanged.
pub fn resolve_alignment_path(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return path.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p).display().to_string(),
        Err(_) => path.to_string(),
    }
}

/// Parses tab-separated `chrom pos depth` lines.
pub fn parse_depth_output(text: &str, sample: &str) -> Result<Vec<DepthRecord>> {
    let mut records = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let bad_line = || PileupError::DepthParse {
            sample: sample.to_string(),
            line: line.to_string(),
        };
        if fields.len() < 3 {
            return Err(bad_line());
        }
        let pos = fields[1].trim().parse::<u64>().map_err(|_| bad_line())?;
        let depth = fields[2].trim().parse::<u32>().map_err(|_| bad_line())?;
        records.push(DepthRecord {
            chrom: fields[0].to_string(),
            pos,
            depth,
        });
    }
    Ok(records)
}

/// `extract_depth_with` using the `samtools` on `PATH`.
pub fn extract_depth(
    region: &Region,
    samples: &[(String, String)],
    index_dir: Option<&Path>,
    depth_cap: u32,
    workers: usize,
) -> Result<PileupTable> {
    extract_depth_with(
        &SamtoolsDepth::default(),
        region,
        samples,
        index_dir,
        depth_cap,
        workers,
    )
}

/// Runs `source` once per `(sample_id, path)` on a pool of `workers` threads
/// and merges the results. Any failing sample aborts the whole batch.
pub fn extract_depth_with<S: DepthSource>(
    source: &S,
    region: &Region,
    samples: &[(String, String)],
    index_dir: Option<&Path>,
    depth_cap: u32,
    workers: usize,
) -> Result<PileupTable> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;

    let progress = Mutex::new(DescriptiveProgress::new(
        samples.len(),
        &format!("  * running samtools depth on region {} for bam", region),
    ));

    // Collecting into a Result stops scheduling samples after the first error.
    let per_sample: Result<Vec<Vec<DepthRecord>>> = pool.install(|| {
        samples
            .par_iter()
            .map(|(_, path)| {
                let result = source.depth(region, path, index_dir, depth_cap);
                if let Ok(mut p) = progress.lock() {
                    p.increment().ok();
                }
                result
            })
            .collect()
    });
    if let Ok(mut p) = progress.lock() {
        p.finish().ok();
    }

    merge_depths(region, samples, per_sample?)
}

/// Builds the table from per-sample records given in `samples` order.
/// Every sample must report exactly the positions of the first one.
pub fn merge_depths(
    region: &Region,
    samples: &[(String, String)],
    per_sample: Vec<Vec<DepthRecord>>,
) -> Result<PileupTable> {
    let mut iter = samples.iter().zip(per_sample);
    let Some(((first_id, _), first)) = iter.next() else {
        return Ok(PileupTable::new(
            region.chrom.clone(),
            region.positions().collect(),
        ));
    };
    if first.is_empty() {
        return Err(PileupError::EmptyDepth {
            sample: first_id.clone(),
            region: region.to_string(),
        });
    }

    let chrom = first[0].chrom.clone();
    let positions: Vec<u64> = first.iter().map(|r| r.pos).collect();
    let mut table = PileupTable::new(chrom, positions);
    table.push_column(first_id.clone(), first.iter().map(|r| r.depth).collect())?;

    for ((sample_id, _), records) in iter {
        let aligned = records.len() == table.positions.len()
            && records
                .iter()
                .zip(&table.positions)
                .all(|(r, &p)| r.pos == p && r.chrom == table.chrom);
        if !aligned {
            return Err(PileupError::PositionMismatch {
                sample: sample_id.clone(),
                reference: first_id.clone(),
            });
        }
        table.push_column(sample_id.clone(), records.iter().map(|r| r.depth).collect())?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_samtools_lines() {
        let text = "chr1\t10\t0\nchr1\t11\t5\n\n";
        let records = parse_depth_output(text, "S1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], DepthRecord { chrom: "chr1".into(), pos: 11, depth: 5 });
    }

    #[test]
    fn rejects_malformed_line() {
        let err = parse_depth_output("chr1\tten\t3\n", "S1").unwrap_err();
        assert!(matches!(err, PileupError::DepthParse { .. }));
    }

    #[test]
    fn builds_samtools_arguments() {
        let region: Region = "chr3:5-9".parse().unwrap();
        let cmd = SamtoolsDepth::default().command(&region, "gs://bucket/a.bam", None, 500);
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["depth", "-a", "-a", "-d", "500", "-Q", "255", "-r", "chr3:5-9", "gs://bucket/a.bam"]
        );
        assert!(cmd.get_current_dir().is_none());
    }

    #[test]
    fn index_dir_sets_child_directory_only() {
        let region: Region = "chr3:5-9".parse().unwrap();
        let before = std::env::current_dir().unwrap();
        let cmd = SamtoolsDepth::default().command(&region, "rel/a.bam", Some(Path::new("/tmp")), 10);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
        let last = cmd.get_args().last().unwrap().to_string_lossy().into_owned();
        assert!(Path::new(&last).is_absolute());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn nonzero_exit_carries_tool_output() {
        // `sh depth ...` fails because there is no script named `depth`.
        let region: Region = "chr1:1-2".parse().unwrap();
        let err = SamtoolsDepth::new("sh")
            .depth(&region, "missing.bam", None, 10)
            .unwrap_err();
        match err {
            PileupError::ToolFailed { sample, output, .. } => {
                assert_eq!(sample, "missing.bam");
                assert!(!output.is_empty());
            }
            other => panic!("expected ToolFailed, got {:?}", other),
        }
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let region: Region = "chr1:1-2".parse().unwrap();
        let err = SamtoolsDepth::new("/nonexistent/bin/samtools")
            .depth(&region, "a.bam", None, 10)
            .unwrap_err();
        assert!(matches!(err, PileupError::ToolSpawn { .. }));
    }

    struct FirstSampleFails {
        calls: AtomicUsize,
    }

    impl DepthSource for FirstSampleFails {
        fn depth(&self, region: &Region, path: &str, _: Option<&Path>, _: u32) -> Result<Vec<DepthRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path == "s0.bam" {
                return Err(PileupError::EmptyDepth {
                    sample: path.to_string(),
                    region: region.to_string(),
                });
            }
            Ok(region
                .positions()
                .map(|pos| DepthRecord { chrom: region.chrom.clone(), pos, depth: 1 })
                .collect())
        }
    }

    #[test]
    fn first_failure_stops_remaining_samples() {
        let region: Region = "chr1:1-5".parse().unwrap();
        let samples: Vec<(String, String)> = (0..64)
            .map(|i| (format!("S{}", i), format!("s{}.bam", i)))
            .collect();
        let source = FirstSampleFails { calls: AtomicUsize::new(0) };
        let err = extract_depth_with(&source, &region, &samples, None, 10, 1).unwrap_err();
        assert!(matches!(err, PileupError::EmptyDepth { .. }));
        assert!(source.calls.load(Ordering::SeqCst) < samples.len());
    }

    #[test]
    fn merge_detects_misaligned_sample() {
        let region: Region = "chr1:1-2".parse().unwrap();
        let samples = vec![("A".to_string(), "a".to_string()), ("B".to_string(), "b".to_string())];
        let rec = |pos, depth| DepthRecord { chrom: "chr1".into(), pos, depth };
        let err = merge_depths(&region, &samples, vec![vec![rec(1, 1), rec(2, 2)], vec![rec(1, 1), rec(3, 2)]])
            .unwrap_err();
        assert!(matches!(err, PileupError::PositionMismatch { .. }));
    }
}
