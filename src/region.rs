use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PileupError, Result};

/// Genomic interval, 1-based inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

fn region_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:\s]+):([\d,]+)-([\d,]+)$").expect("valid region regex"))
}

impl Region {
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        let chrom = chrom.into();
        if start == 0 || end < start {
            return Err(PileupError::InvalidRegion(format!(
                "{}:{}-{}",
                chrom, start, end
            )));
        }
        Ok(Self { chrom, start, end })
    }

    /// Number of positions covered.
    pub fn span(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn positions(&self) -> impl Iterator<Item = u64> {
        self.start..=self.end
    }
}

impl FromStr for Region {
    type Err = PileupError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = region_regex()
            .captures(s.trim())
            .ok_or_else(|| PileupError::InvalidRegion(s.to_string()))?;
        let parse = |m: &str| -> Result<u64> {
            m.replace(',', "")
                .parse::<u64>()
                .map_err(|_| PileupError::InvalidRegion(s.to_string()))
        };
        Region::new(&caps[1], parse(&caps[2])?, parse(&caps[3])?)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let r: Region = "chr1:1,000-1,009".parse().unwrap();
        assert_eq!(r.chrom, "chr1");
        assert_eq!(r.span(), 10);
        assert_eq!(r.to_string(), "chr1:1000-1009");
    }

    #[test]
    fn rejects_inverted_and_malformed() {
        assert!("chr1:20-10".parse::<Region>().is_err());
        assert!("chr1:0-10".parse::<Region>().is_err());
        assert!("chr1-10-20".parse::<Region>().is_err());
    }
}
