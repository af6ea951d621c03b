//! Read-depth pileups for QTL inspection: per-sample depth extraction,
//! reads-per-million normalization, genotype grouping and a stacked figure
//! aligned on an intron-collapsed gene model.

pub mod coverage;
pub mod depth;
pub mod error;
pub mod gene;
pub mod genotype;
pub mod layout;
pub mod logger;
pub mod norm;
pub mod plot;
pub mod progress;
pub mod region;
pub mod residualize;
pub mod table;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use depth::{extract_depth, extract_depth_with, DepthRecord, DepthSource, SamtoolsDepth};
pub use error::{PileupError, Result};
pub use gene::{Gene, GeneModel, GeneStyle, Transcript};
pub use genotype::{group_by_genotype, group_profiles, DosageLookup, DosageMap, GenotypeSource, VcfDosageLookup};
pub use layout::{LayoutConfig, PanelLayout};
pub use norm::{normalize, LibrarySizeMap, ProfileTransform};
pub use plot::{plan_figure, render, render_to_file, FigurePlan, LegendPlacement, Panel, PanelKind, PlotOptions, TraceOrder};
pub use region::Region;
pub use residualize::{CovariateTable, Residualizer};
pub use table::{PileupTable, ProfileTable, TraceLabel};
