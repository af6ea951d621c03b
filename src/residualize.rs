//! Linear confound removal for normalized profiles.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::{PileupError, Result};
use crate::norm::ProfileTransform;
use crate::table::ProfileTable;

/// Covariate values, one row per sample.
#[derive(Debug, Clone)]
pub struct CovariateTable {
    pub samples: Vec<String>,
    pub names: Vec<String>,
    /// `values[sample][covariate]`
    pub values: Vec<Vec<f64>>,
}

impl CovariateTable {
    /// Reads a covariates-as-rows file: a header `ID<TAB>sample...` followed by
    /// `name<TAB>value...` lines.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bad = |message: String| PileupError::TableFormat {
            path: path.display().to_string(),
            message,
        };
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header = lines.next().ok_or_else(|| bad("empty file".to_string()))??;
        let samples: Vec<String> = header
            .trim_end()
            .split('\t')
            .skip(1)
            .map(|s| s.to_string())
            .collect();

        let mut names = Vec::new();
        let mut values = vec![Vec::new(); samples.len()];
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            if fields.len() != samples.len() + 1 {
                return Err(bad(format!("line {} has {} fields", line_num + 2, fields.len())));
            }
            names.push(fields[0].to_string());
            for (sample_values, v) in values.iter_mut().zip(&fields[1..]) {
                let v = v
                    .parse::<f64>()
                    .map_err(|e| bad(format!("line {}: {}", line_num + 2, e)))?;
                sample_values.push(v);
            }
        }
        Ok(Self {
            samples,
            names,
            values,
        })
    }

    fn row(&self, sample: &str) -> Option<&[f64]> {
        self.samples
            .iter()
            .position(|s| s == sample)
            .map(|i| self.values[i].as_slice())
    }
}

/// Removes the least-squares fit of mean-centered covariates from every
/// position row: `M - (M - mean(M)) Q Qᵀ`, with `Q` from the thin QR of the
/// centered covariate matrix.
pub struct Residualizer {
    covariates: CovariateTable,
}

impl Residualizer {
    pub fn new(covariates: CovariateTable) -> Self {
        Self { covariates }
    }

    /// Orthonormal basis for the centered covariates of `samples`, in order.
    fn basis(&self, samples: &[String]) -> Result<DMatrix<f64>> {
        let k = self.covariates.names.len();
        let n = samples.len();
        let rows = samples
            .iter()
            .map(|s| {
                self.covariates
                    .row(s)
                    .ok_or_else(|| PileupError::CovariateMismatch(s.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut c = DMatrix::from_fn(n, k, |i, j| rows[i][j]);
        for j in 0..k {
            let mean = c.column(j).sum() / n as f64;
            for i in 0..n {
                c[(i, j)] -= mean;
            }
        }
        Ok(c.qr().q())
    }
}

impl ProfileTransform for Residualizer {
    fn transform(&self, table: &ProfileTable) -> Result<ProfileTable> {
        let samples: Vec<String> = table.labels.iter().map(|l| l.to_string()).collect();
        if samples.is_empty() || self.covariates.names.is_empty() {
            return Ok(table.clone());
        }
        let q = self.basis(&samples)?;
        let p = table.n_rows();
        let n = table.n_cols();

        let m = DMatrix::from_fn(p, n, |i, j| table.values[j][i]);
        let mut m0 = m.clone();
        for i in 0..p {
            let mean = m.row(i).sum() / n as f64;
            for j in 0..n {
                m0[(i, j)] -= mean;
            }
        }
        let residual = &m - (&m0 * &q) * q.transpose();

        let mut out = ProfileTable::new(table.chrom.clone(), table.positions.clone());
        for (j, label) in table.labels.iter().enumerate() {
            let column: Vec<f64> = (0..p).map(|i| residual[(i, j)]).collect();
            out.push_column(label.clone(), column)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn covariates() -> CovariateTable {
        CovariateTable {
            samples: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            names: vec!["age".into()],
            values: vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]],
        }
    }

    #[test]
    fn removes_exact_linear_effect() {
        // value = 5 + 2 * age at both positions
        let mut t = ProfileTable::new("chr1", vec![1, 2]);
        for (s, age) in [("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 4.0)] {
            t.push_column(s, vec![5.0 + 2.0 * age, 5.0 + 2.0 * age]).unwrap();
        }
        let r = Residualizer::new(covariates()).transform(&t).unwrap();
        assert_eq!(r.labels, t.labels);
        // only the per-row mean remains
        for column in &r.values {
            assert_approx_eq!(column[0], 10.0, 1e-9);
            assert_approx_eq!(column[1], 10.0, 1e-9);
        }
    }

    #[test]
    fn unknown_sample_is_an_error() {
        let mut t = ProfileTable::new("chr1", vec![1]);
        t.push_column("Z", vec![1.0]).unwrap();
        assert!(matches!(
            Residualizer::new(covariates()).transform(&t),
            Err(PileupError::CovariateMismatch(s)) if s == "Z"
        ));
    }
}
