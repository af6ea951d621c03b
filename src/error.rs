use thiserror::Error;

#[derive(Error, Debug)]
pub enum PileupError {
    #[error("Failed to start {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("samtools depth failed for sample {sample} ({status}): {output}")]
    ToolFailed {
        sample: String,
        status: String,
        output: String,
    },
    #[error("Malformed depth output for sample {sample}: {line:?}")]
    DepthParse { sample: String, line: String },
    #[error("No depth records returned for sample {sample} in {region}")]
    EmptyDepth { sample: String, region: String },
    #[error("Positions reported for sample {sample} differ from sample {reference}")]
    PositionMismatch { sample: String, reference: String },
    #[error("Invalid region: {0}")]
    InvalidRegion(String),
    #[error("No library size for sample {0}")]
    MissingLibrarySize(String),
    #[error("Library size is zero for sample {0}")]
    ZeroLibrarySize(String),
    #[error("Unsupported format for genotypes: {0}")]
    UnsupportedGenotypeSource(String),
    #[error("Variant {0} not found")]
    VariantNotFound(String),
    #[error("Invalid variant id {0:?}: expected chrom_pos_ref_alt")]
    InvalidVariantId(String),
    #[error("Sample {0} has no covariate values")]
    CovariateMismatch(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Malformed table {path}: {message}")]
    TableFormat { path: String, message: String },
    #[error("Gene {0} not found in annotation")]
    GeneNotFound(String),
    #[error("Failed to read coverage track: {0}")]
    Coverage(String),
    #[error("Failed to draw figure: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to read VCF: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] config::ConfigError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PileupError>;

pub(crate) fn plot_error<E: std::fmt::Display>(e: E) -> PileupError {
    PileupError::Plot(e.to_string())
}
