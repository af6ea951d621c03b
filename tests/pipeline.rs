use std::path::Path;
use std::thread;
use std::time::Duration;

use assert_approx_eq::assert_approx_eq;
use rand::Rng;

use pileup_qtl::depth::{extract_depth_with, DepthRecord, DepthSource};
use pileup_qtl::genotype::{group_by_genotype, group_profiles, DosageMap, GenotypeSource};
use pileup_qtl::norm::{identity_id_map, normalize, LibrarySizeMap};
use pileup_qtl::{PileupError, PileupTable, Region, Result, TraceLabel};

/// Deterministic depths derived from the path, returned after a random delay
/// so tasks finish out of order.
struct JitteredDepth;

impl DepthSource for JitteredDepth {
    fn depth(&self, region: &Region, path: &str, _index_dir: Option<&Path>, depth_cap: u32) -> Result<Vec<DepthRecord>> {
        let delay = rand::thread_rng().gen_range(0..15);
        thread::sleep(Duration::from_millis(delay));
        let seed = path.bytes().map(u32::from).sum::<u32>();
        Ok(region
            .positions()
            .map(|pos| DepthRecord {
                chrom: region.chrom.clone(),
                pos,
                depth: ((seed + pos as u32 * 7) % 50).min(depth_cap),
            })
            .collect())
    }
}

struct FailingDepth;

impl DepthSource for FailingDepth {
    fn depth(&self, region: &Region, path: &str, _index_dir: Option<&Path>, _depth_cap: u32) -> Result<Vec<DepthRecord>> {
        if path.ends_with("bad.bam") {
            return Err(PileupError::ToolFailed {
                sample: path.to_string(),
                status: "exit status: 1".to_string(),
                output: "could not open bad.bam".to_string(),
            });
        }
        JitteredDepth.depth(region, path, None, 100)
    }
}

fn samples(n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|i| (format!("S{}", i), format!("/data/sample_{}.bam", i)))
        .collect()
}

#[test]
fn table_has_one_column_per_sample_and_one_row_per_position() {
    let region: Region = "chr7:1,000-1,099".parse().unwrap();
    let table = extract_depth_with(&JitteredDepth, &region, &samples(6), None, 100, 3).unwrap();
    assert_eq!(table.n_cols(), 6);
    assert_eq!(table.n_rows(), 100);
    assert!(table.positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(table.samples, (0..6).map(|i| format!("S{}", i)).collect::<Vec<_>>());
    assert_eq!(table.row_keys()[0], "chr7_1000");
}

#[test]
fn worker_count_does_not_change_the_table() {
    let region: Region = "chr2:500-560".parse().unwrap();
    let samples = samples(16);
    let serial = extract_depth_with(&JitteredDepth, &region, &samples, None, 100, 1).unwrap();
    let parallel = extract_depth_with(&JitteredDepth, &region, &samples, None, 100, 8).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn one_failing_sample_fails_the_batch() {
    let region: Region = "chr2:1-10".parse().unwrap();
    let mut list = samples(4);
    list.push(("BAD".to_string(), "/data/bad.bam".to_string()));
    let err = extract_depth_with(&FailingDepth, &region, &list, None, 100, 4).unwrap_err();
    match err {
        PileupError::ToolFailed { sample, output, .. } => {
            assert_eq!(sample, "/data/bad.bam");
            assert!(output.contains("could not open"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

fn raw_table() -> PileupTable {
    let mut t = PileupTable::new("chr1", vec![101, 102]);
    t.push_column("GTEX-A-0001", vec![10, 20]).unwrap();
    t.push_column("GTEX-B-0001", vec![30, 40]).unwrap();
    t.push_column("GTEX-C-0001", vec![5, 0]).unwrap();
    t
}

fn libsizes() -> LibrarySizeMap {
    LibrarySizeMap::from([
        ("GTEX-A-0001".to_string(), 1_000_000),
        ("GTEX-B-0001".to_string(), 2_000_000),
        ("GTEX-C-0001".to_string(), 500_000),
    ])
}

#[test]
fn normalizing_twice_gives_equal_tables() {
    let a = normalize(&raw_table(), &libsizes(), None, Some(&identity_id_map)).unwrap();
    let b = normalize(&raw_table(), &libsizes(), None, Some(&identity_id_map)).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.labels[0], TraceLabel::from("GTEX-A-0001"));
}

#[test]
fn normalize_then_group_by_dosage() {
    let dosages = DosageMap::from([
        ("GTEX-A".to_string(), Some(0)),
        ("GTEX-B".to_string(), Some(1)),
        ("GTEX-C".to_string(), None),
    ]);
    let grouped = group_by_genotype(
        &raw_table(),
        &libsizes(),
        "chr1_150_A_G_b38",
        &GenotypeSource::Dosages(dosages.clone()),
        None,
        None,
    )
    .unwrap();
    assert_eq!(grouped.labels, vec![TraceLabel::Dosage(0), TraceLabel::Dosage(1)]);
    assert_eq!(grouped.positions, vec![101, 102]);
    let het = grouped.column(&TraceLabel::Dosage(1)).unwrap();
    assert_approx_eq!(het[0], 15.0);
    assert_approx_eq!(het[1], 20.0);

    // same result from the two-step path
    let rpm = normalize(&raw_table(), &libsizes(), None, None).unwrap();
    assert_eq!(group_profiles(&rpm, &dosages).unwrap(), grouped);
}

#[test]
fn unsupported_variant_file_fails_before_normalizing() {
    // no library sizes at all: the source check must come first
    let err = group_by_genotype(
        &raw_table(),
        &LibrarySizeMap::new(),
        "chr1_150_A_G",
        &GenotypeSource::VariantFile("genotypes.txt".into()),
        None,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, PileupError::UnsupportedGenotypeSource(_)));
}

#[test]
fn tables_survive_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("depth.csv");
    let table = raw_table();
    table.write_csv(&path).unwrap();
    assert_eq!(PileupTable::read_csv(&path).unwrap(), table);
}
