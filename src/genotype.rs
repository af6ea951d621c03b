use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rust_htslib::bcf::record::GenotypeAllele;
use rust_htslib::bcf::{self, Read};

use crate::error::{PileupError, Result};
use crate::norm::{normalize, IdMap, LibrarySizeMap, ProfileTransform};
use crate::table::{PileupTable, ProfileTable, TraceLabel};

/// Sample id -> alternate-allele dosage, `None` when missing.
pub type DosageMap = HashMap<String, Option<i32>>;

/// Where genotypes come from.
#[derive(Debug, Clone)]
pub enum GenotypeSource {
    Dosages(DosageMap),
    VariantFile(PathBuf),
}

/// Looks up per-sample dosages of one variant in a variant-call file.
pub trait DosageLookup {
    fn dosages(&self, variant_id: &str, vcf: &Path) -> Result<DosageMap>;
}

/// Fields of a `chrom_pos_ref_alt[_build]` variant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantId {
    pub chrom: String,
    pub pos: u64,
    pub reference: String,
    pub alternate: String,
}

impl VariantId {
    pub fn parse(variant_id: &str) -> Result<Self> {
        let fields: Vec<&str> = variant_id.split('_').collect();
        if fields.len() < 4 {
            return Err(PileupError::InvalidVariantId(variant_id.to_string()));
        }
        // Positions are 1-based.
        let pos = fields[1]
            .parse::<u64>()
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| PileupError::InvalidVariantId(variant_id.to_string()))?;
        Ok(Self {
            chrom: fields[0].to_string(),
            pos,
            reference: fields[2].to_string(),
            alternate: fields[3].to_string(),
        })
    }

    /// Genotype strings for dosages 0, 1 and 2.
    pub fn genotype_labels(&self) -> [String; 3] {
        let (r, a) = (&self.reference, &self.alternate);
        [format!("{}{}", r, r), format!("{}{}", r, a), format!("{}{}", a, a)]
    }
}

/// Reads dosages from a bgzipped, indexed VCF/BCF with rust-htslib.
#[derive(Debug, Default, Clone, Copy)]
pub struct VcfDosageLookup;

impl DosageLookup for VcfDosageLookup {
    fn dosages(&self, variant_id: &str, vcf: &Path) -> Result<DosageMap> {
        let variant = VariantId::parse(variant_id)?;
        let mut reader = bcf::IndexedReader::from_path(vcf)?;
        let samples: Vec<String> = reader
            .header()
            .samples()
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        let rid = reader.header().name2rid(variant.chrom.as_bytes())?;
        let pos0 = variant.pos - 1;
        reader.fetch(rid, pos0, Some(pos0 + 1))?;

        for record in reader.records() {
            let record = record?;
            if record.pos() as u64 != pos0 {
                continue;
            }
            let alleles = record.alleles();
            let matches = alleles.len() >= 2
                && alleles[0] == variant.reference.as_bytes()
                && alleles[1..].iter().any(|a| *a == variant.alternate.as_bytes());
            if !matches {
                continue;
            }
            let alt_index = alleles
                .iter()
                .position(|a| *a == variant.alternate.as_bytes())
                .unwrap_or(1) as i32;
            let genotypes = record.genotypes()?;
            let mut dosages = DosageMap::with_capacity(samples.len());
            for (i, sample) in samples.iter().enumerate() {
                dosages.insert(sample.clone(), allele_dosage(&genotypes.get(i), alt_index));
            }
            return Ok(dosages);
        }
        Err(PileupError::VariantNotFound(variant_id.to_string()))
    }
}

/// Number of `alt_index` alleles; `None` when any allele is missing.
fn allele_dosage(alleles: &[GenotypeAllele], alt_index: i32) -> Option<i32> {
    let mut dosage = 0;
    for allele in alleles {
        match allele.index() {
            Some(i) if i as i32 == alt_index => dosage += 1,
            Some(_) => {}
            None => return None,
        }
    }
    Some(dosage)
}

/// Reads `sample,dosage` lines; empty, `NA` or `.` dosages are missing.
pub fn read_dosages<P: AsRef<Path>>(path: P) -> Result<DosageMap> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut dosages = DosageMap::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(|c| c == '\t' || c == ',').map(|f| f.trim()).collect();
        let value = fields.get(1).copied().unwrap_or("");
        let dosage = match value {
            "" | "NA" | "nan" | "NaN" | "." => None,
            v => match v.parse::<f64>() {
                Ok(d) => Some(d.round() as i32),
                Err(_) if line_num == 0 => continue,
                Err(e) => {
                    return Err(PileupError::TableFormat {
                        path: path.display().to_string(),
                        message: format!("line {}: {}", line_num + 1, e),
                    })
                }
            },
        };
        dosages.insert(fields[0].to_string(), dosage);
    }
    Ok(dosages)
}

/// Resolves `source` to dosages restricted to `samples`. Variant files must
/// be `.vcf.gz`.
pub fn resolve_genotypes(
    source: &GenotypeSource,
    variant_id: &str,
    samples: &[String],
    lookup: &dyn DosageLookup,
) -> Result<DosageMap> {
    match source {
        GenotypeSource::Dosages(map) => Ok(map.clone()),
        GenotypeSource::VariantFile(path) => {
            if !path.to_string_lossy().ends_with(".vcf.gz") {
                return Err(PileupError::UnsupportedGenotypeSource(
                    path.display().to_string(),
                ));
            }
            let all = lookup.dosages(variant_id, path)?;
            Ok(samples
                .iter()
                .map(|s| (s.clone(), all.get(s).copied().flatten()))
                .collect())
        }
    }
}

/// Averages already-normalized profiles per dosage category. Columns are
/// ordered by ascending dosage; samples without a dosage are skipped.
pub fn group_profiles(profiles: &ProfileTable, dosages: &DosageMap) -> Result<ProfileTable> {
    let member_dosage = |label: &TraceLabel| -> Option<i32> {
        match label {
            TraceLabel::Sample(s) => dosages.get(s).copied().flatten(),
            TraceLabel::Dosage(_) => None,
        }
    };
    let categories: BTreeSet<i32> = profiles.labels.iter().filter_map(|l| member_dosage(l)).collect();

    let mut grouped = ProfileTable::new(profiles.chrom.clone(), profiles.positions.clone());
    for category in categories {
        let members: Vec<&Vec<f64>> = profiles
            .labels
            .iter()
            .zip(&profiles.values)
            .filter(|(label, _)| member_dosage(*label) == Some(category))
            .map(|(_, values)| values)
            .collect();
        let n = members.len() as f64;
        let means = (0..profiles.n_rows())
            .map(|row| members.iter().map(|c| c[row]).sum::<f64>() / n)
            .collect();
        grouped.push_column(TraceLabel::Dosage(category), means)?;
    }
    Ok(grouped)
}

/// Normalizes `table` and averages it per genotype of `variant_id`.
pub fn group_by_genotype(
    table: &PileupTable,
    libsizes: &LibrarySizeMap,
    variant_id: &str,
    source: &GenotypeSource,
    covariates: Option<&dyn ProfileTransform>,
    id_map: Option<IdMap<'_>>,
) -> Result<ProfileTable> {
    group_by_genotype_with(
        &VcfDosageLookup,
        table,
        libsizes,
        variant_id,
        source,
        covariates,
        id_map,
    )
}

pub fn group_by_genotype_with(
    lookup: &dyn DosageLookup,
    table: &PileupTable,
    libsizes: &LibrarySizeMap,
    variant_id: &str,
    source: &GenotypeSource,
    covariates: Option<&dyn ProfileTransform>,
    id_map: Option<IdMap<'_>>,
) -> Result<ProfileTable> {
    if let GenotypeSource::VariantFile(path) = source {
        if !path.to_string_lossy().ends_with(".vcf.gz") {
            return Err(PileupError::UnsupportedGenotypeSource(path.display().to_string()));
        }
    }
    let rpm = normalize(table, libsizes, covariates, id_map)?;
    let samples: Vec<String> = rpm.labels.iter().map(|l| l.to_string()).collect();
    let dosages = resolve_genotypes(source, variant_id, &samples, lookup)?;
    group_profiles(&rpm, &dosages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> ProfileTable {
        let mut t = ProfileTable::new("chr1", vec![1, 2]);
        t.push_column("A", vec![2.0, 2.0]).unwrap();
        t.push_column("B", vec![4.0, 4.0]).unwrap();
        t.push_column("C", vec![6.0, 6.0]).unwrap();
        t.push_column("D", vec![100.0, 100.0]).unwrap();
        t
    }

    #[test]
    fn averages_per_dosage_in_ascending_order() {
        let dosages = DosageMap::from([
            ("C".to_string(), Some(1)),
            ("A".to_string(), Some(0)),
            ("B".to_string(), Some(1)),
            ("D".to_string(), None),
        ]);
        let grouped = group_profiles(&profiles(), &dosages).unwrap();
        assert_eq!(grouped.labels, vec![TraceLabel::Dosage(0), TraceLabel::Dosage(1)]);
        assert_eq!(grouped.values, vec![vec![2.0, 2.0], vec![5.0, 5.0]]);
    }

    #[test]
    fn variant_id_labels() {
        let v = VariantId::parse("chr1_12345_A_G_b38").unwrap();
        assert_eq!(v.pos, 12345);
        assert_eq!(v.genotype_labels(), ["AA".to_string(), "AG".to_string(), "GG".to_string()]);
        assert!(matches!(
            VariantId::parse("chr1_12345_A"),
            Err(PileupError::InvalidVariantId(_))
        ));
        assert!(matches!(
            VariantId::parse("chr1_0_A_G_b38"),
            Err(PileupError::InvalidVariantId(_))
        ));
    }

    #[test]
    fn allele_counting() {
        use GenotypeAllele::*;
        assert_eq!(allele_dosage(&[Unphased(0), Phased(1)], 1), Some(1));
        assert_eq!(allele_dosage(&[Unphased(1), Phased(1)], 1), Some(2));
        assert_eq!(allele_dosage(&[UnphasedMissing, Phased(1)], 1), None);
    }

    struct FixedLookup(DosageMap);
    impl DosageLookup for FixedLookup {
        fn dosages(&self, _variant_id: &str, _vcf: &Path) -> Result<DosageMap> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn variant_file_is_restricted_to_table_samples() {
        let lookup = FixedLookup(DosageMap::from([
            ("A".to_string(), Some(2)),
            ("X".to_string(), Some(0)),
        ]));
        let source = GenotypeSource::VariantFile(PathBuf::from("calls.vcf.gz"));
        let resolved = resolve_genotypes(&source, "chr1_1_A_G", &["A".to_string(), "B".to_string()], &lookup).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["A"], Some(2));
        assert_eq!(resolved["B"], None);
    }

    #[test]
    fn rejects_other_file_types() {
        let source = GenotypeSource::VariantFile(PathBuf::from("calls.bed"));
        let err = resolve_genotypes(&source, "chr1_1_A_G", &[], &VcfDosageLookup).unwrap_err();
        assert!(matches!(err, PileupError::UnsupportedGenotypeSource(_)));
    }
}
