use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use pileup_qtl::depth::{extract_depth_with, SamtoolsDepth, DEFAULT_DEPTH_CAP, DEFAULT_WORKERS};
use pileup_qtl::gene::Gene;
use pileup_qtl::genotype::{group_by_genotype, read_dosages, GenotypeSource};
use pileup_qtl::layout::LayoutConfig;
use pileup_qtl::logger::Logger;
use pileup_qtl::norm::{identity_id_map, normalize, read_library_sizes, IdMap, ProfileTransform};
use pileup_qtl::plot::{render_to_file, PlotOptions, ShadeRange, TraceOrder};
use pileup_qtl::progress::format_time_used;
use pileup_qtl::residualize::{CovariateTable, Residualizer};
use pileup_qtl::{PileupTable, ProfileTable, Region, VERSION};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-sample read depth over a region with samtools
    Depth(DepthArgs),
    /// Convert a depth table to reads per million
    Norm(NormArgs),
    /// Normalize and average profiles per genotype of a variant
    Group(GroupArgs),
    /// Draw profile tables above a gene model
    Plot(PlotArgs),
}

#[derive(Args)]
struct DepthArgs {
    /// Region as chr:start-end
    #[arg(short = 'r', long = "region")]
    pub region: String,
    /// Tab-separated sample list: sample_id, alignment path or URL
    #[arg(short = 's', long = "samples")]
    pub samples: String,
    /// Output CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Directory holding the alignment indexes; samtools runs from there
    #[arg(short = 'i', long = "index-dir")]
    pub index_dir: Option<String>,
    /// Maximum depth reported per position
    #[arg(short = 'd', long = "depth-cap", default_value_t = DEFAULT_DEPTH_CAP)]
    pub depth_cap: u32,
    /// Number of parallel samtools processes
    #[arg(short = 't', long = "threads", default_value_t = DEFAULT_WORKERS)]
    pub threads: usize,
    /// samtools executable
    #[arg(long = "samtools", default_value = "samtools")]
    pub samtools: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

#[derive(Args)]
struct NormArgs {
    /// Depth CSV from `depth`
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Library sizes: sample, total mapped reads
    #[arg(short = 'L', long = "libsizes")]
    pub libsizes: String,
    /// Covariates to regress out (covariates as rows, samples as columns)
    #[arg(short = 'c', long = "covariates")]
    pub covariates: Option<String>,
    /// Keep full sample codes instead of the first two hyphen fields
    #[arg(long = "raw-ids")]
    pub raw_ids: bool,
    /// Output CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

#[derive(Args)]
struct GroupArgs {
    /// Depth CSV from `depth`
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Library sizes: sample, total mapped reads
    #[arg(short = 'L', long = "libsizes")]
    pub libsizes: String,
    /// Variant id chrom_pos_ref_alt[_build]
    #[arg(short = 'v', long = "variant")]
    pub variant: String,
    /// Per-sample dosages: sample, dosage
    #[arg(long = "dosages", conflicts_with = "vcf")]
    pub dosages: Option<String>,
    /// Indexed .vcf.gz with the variant
    #[arg(long = "vcf")]
    pub vcf: Option<String>,
    /// Covariates to regress out before grouping
    #[arg(short = 'c', long = "covariates")]
    pub covariates: Option<String>,
    /// Keep full sample codes instead of the first two hyphen fields
    #[arg(long = "raw-ids")]
    pub raw_ids: bool,
    /// Output CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

#[derive(Args)]
struct PlotArgs {
    /// Profile CSVs, bottom panel first (comma-separated)
    #[arg(short = 'p', long = "profiles", value_delimiter = ',', required = true)]
    pub profiles: Vec<String>,
    /// GTF annotation
    #[arg(short = 'g', long = "gtf")]
    pub gtf: String,
    /// Gene id or name
    #[arg(short = 'G', long = "gene")]
    pub gene: String,
    /// Output figure (.svg, otherwise bitmap)
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Variant id chrom_pos_ref_alt[_build]
    #[arg(short = 'v', long = "variant")]
    pub variant: Option<String>,
    /// Trace order: additive, sorted, none, or a comma-separated label list
    #[arg(long = "order", default_value = "additive")]
    pub order: String,
    #[arg(long = "title")]
    pub title: Option<String>,
    /// Mark the variant position under each panel
    #[arg(long = "show-variant-pos")]
    pub show_variant_pos: bool,
    /// Introns longer than this are drawn at this width (bp)
    #[arg(long = "max-intron", default_value_t = 300)]
    pub max_intron: u64,
    #[arg(long = "alpha", default_value_t = 1.0)]
    pub alpha: f64,
    /// Line width in points for --outline
    #[arg(long = "lw", default_value_t = 0.5)]
    pub lw: f64,
    /// Draw outlines instead of filled areas
    #[arg(long = "outline")]
    pub outline: bool,
    /// Shaded bands: chr:start-end or comma-separated positions
    #[arg(long = "shade")]
    pub shade: Option<String>,
    #[arg(long = "ymax")]
    pub ymax: Option<f64>,
    /// Collapsed x range as lo,hi
    #[arg(long = "xlim", value_delimiter = ',', num_args = 2)]
    pub xlim: Option<Vec<f64>>,
    /// Y labels, one per panel (comma-separated)
    #[arg(long = "labels", value_delimiter = ',')]
    pub labels: Option<Vec<String>>,
    /// Introns drawn in red, as start-end (comma-separated)
    #[arg(long = "highlight-introns", value_delimiter = ',')]
    pub highlight_introns: Option<Vec<String>>,
    /// Introns drawn in blue, as start-end (comma-separated)
    #[arg(long = "highlight-introns2", value_delimiter = ',')]
    pub highlight_introns2: Option<Vec<String>>,
    /// Mappability bigWig or bedGraph
    #[arg(short = 'm', long = "mappability")]
    pub mappability: Option<String>,
    /// Layout overrides (TOML, JSON or YAML)
    #[arg(long = "layout")]
    pub layout: Option<String>,
    #[arg(long = "dpi", default_value_t = 100.0)]
    pub dpi: f64,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

fn open_logger(log: &Option<String>, default: &str) -> Result<Logger, Box<dyn Error>> {
    Ok(Logger::create(log.as_deref().unwrap_or(default))?)
}

fn require_file(label: &str, path: &str) -> Result<(), Box<dyn Error>> {
    if path.trim().is_empty() {
        return Err(format!("Error: {} path cannot be empty", label).into());
    }
    if !Path::new(path).exists() {
        return Err(format!("Error: {} does not exist: {}", label, path).into());
    }
    Ok(())
}

fn require_csv_output(path: &str) -> Result<(), Box<dyn Error>> {
    if !path.ends_with(".csv") {
        return Err(format!("Error: output path must end with .csv: {}", path).into());
    }
    Ok(())
}

fn validate_depth_args(args: &DepthArgs) -> Result<(), Box<dyn Error>> {
    args.region.parse::<Region>()?;
    require_file("Sample list", &args.samples)?;
    if let Some(dir) = &args.index_dir {
        if !Path::new(dir).is_dir() {
            return Err(format!("Error: index directory does not exist: {}", dir).into());
        }
    }
    if args.threads == 0 {
        return Err("Error: thread count must be greater than 0".into());
    }
    if args.depth_cap == 0 {
        return Err("Error: depth cap must be greater than 0".into());
    }
    require_csv_output(&args.output)
}

fn validate_norm_args(args: &NormArgs) -> Result<(), Box<dyn Error>> {
    require_file("Depth table", &args.input)?;
    require_file("Library size file", &args.libsizes)?;
    if let Some(c) = &args.covariates {
        require_file("Covariate file", c)?;
    }
    require_csv_output(&args.output)
}

fn validate_group_args(args: &GroupArgs) -> Result<(), Box<dyn Error>> {
    require_file("Depth table", &args.input)?;
    require_file("Library size file", &args.libsizes)?;
    match (&args.dosages, &args.vcf) {
        (Some(d), None) => require_file("Dosage file", d)?,
        (None, Some(v)) => require_file("VCF", v)?,
        _ => return Err("Error: exactly one of --dosages or --vcf is required".into()),
    }
    if let Some(c) = &args.covariates {
        require_file("Covariate file", c)?;
    }
    require_csv_output(&args.output)
}

fn validate_plot_args(args: &PlotArgs) -> Result<(), Box<dyn Error>> {
    for p in &args.profiles {
        require_file("Profile table", p)?;
    }
    require_file("GTF", &args.gtf)?;
    if let Some(m) = &args.mappability {
        require_file("Mappability track", m)?;
    }
    if let Some(l) = &args.layout {
        require_file("Layout config", l)?;
    }
    if let Some(labels) = &args.labels {
        if labels.len() != args.profiles.len() {
            return Err(format!(
                "Error: {} labels given for {} profile tables",
                labels.len(),
                args.profiles.len()
            )
            .into());
        }
    }
    if !(0.0..=1.0).contains(&args.alpha) {
        return Err(format!("Error: alpha must be within [0, 1]: {}", args.alpha).into());
    }
    if args.dpi <= 0.0 {
        return Err("Error: dpi must be positive".into());
    }
    Ok(())
}

/// `sample_id<TAB>path` lines; `#` comments and blank lines are skipped.
fn read_sample_list(path: &str) -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(|f| f.trim()).collect();
        if fields.len() < 2 || fields[1].is_empty() {
            return Err(format!("{} line {}: expected sample_id and path", path, line_num + 1).into());
        }
        samples.push((fields[0].to_string(), fields[1].to_string()));
    }
    Ok(samples)
}

fn parse_interval(text: &str) -> Result<(u64, u64), Box<dyn Error>> {
    let (s, e) = text
        .split_once('-')
        .ok_or_else(|| format!("Error: expected start-end, got {}", text))?;
    Ok((s.trim().parse()?, e.trim().parse()?))
}

fn load_covariates(path: &Option<String>) -> Result<Option<Residualizer>, Box<dyn Error>> {
    Ok(match path {
        Some(p) => Some(Residualizer::new(CovariateTable::read(p)?)),
        None => None,
    })
}

fn run_depth(args: &DepthArgs, logger: &mut Logger) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let region: Region = args.region.parse()?;
    let samples = read_sample_list(&args.samples)?;

    logger.log("=== pileup-qtl Depth Log ===")?;
    logger.log(&format!("Software Version: v{}", VERSION))?;
    logger.log(&format!("Runtime: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")))?;
    logger.log(&format!("Region: {}", region))?;
    logger.log(&format!("Sample list: {} ({} samples)", args.samples, samples.len()))?;
    logger.log(&format!("Index directory: {}", args.index_dir.as_deref().unwrap_or("-")))?;
    logger.log(&format!("Depth cap: {}", args.depth_cap))?;
    logger.log(&format!("Threads: {}", args.threads))?;
    logger.log(&format!("Output File: {}", args.output))?;

    logger.step("Running samtools depth")?;
    logger.end_steps();
    let source = SamtoolsDepth::new(&args.samtools);
    let table: PileupTable = extract_depth_with(
        &source,
        &region,
        &samples,
        args.index_dir.as_deref().map(Path::new),
        args.depth_cap,
        args.threads,
    )?;
    table.write_csv(&args.output)?;

    logger.log(&format!(
        "Depth table written: {} positions x {} samples",
        table.n_rows(),
        table.n_cols()
    ))?;
    let elapsed = format_time_used(start.elapsed());
    logger.log(&elapsed)?;
    println!("{}", elapsed);
    Ok(())
}

fn run_norm(args: &NormArgs, logger: &mut Logger) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    logger.log("=== pileup-qtl Norm Log ===")?;
    logger.log(&format!("Software Version: v{}", VERSION))?;
    logger.log(&format!("Runtime: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")))?;
    logger.log(&format!("Depth table: {}", args.input))?;
    logger.log(&format!("Library sizes: {}", args.libsizes))?;
    logger.log(&format!("Covariates: {}", args.covariates.as_deref().unwrap_or("-")))?;
    logger.log(&format!("Output File: {}", args.output))?;

    logger.step("Reading depth table and library sizes")?;
    let table = PileupTable::read_csv(&args.input)?;
    let libsizes = read_library_sizes(&args.libsizes)?;
    let residualizer = load_covariates(&args.covariates)?;
    let id_map: Option<IdMap<'_>> = if args.raw_ids { Some(&identity_id_map) } else { None };

    logger.step("Normalizing to reads per million")?;
    let rpm = normalize(
        &table,
        &libsizes,
        residualizer.as_ref().map(|r| r as &dyn ProfileTransform),
        id_map,
    )?;
    rpm.write_csv(&args.output)?;
    logger.end_steps();

    logger.log(&format!("Normalized {} samples", rpm.n_cols()))?;
    logger.log(&format_time_used(start.elapsed()))?;
    Ok(())
}

fn run_group(args: &GroupArgs, logger: &mut Logger) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    logger.log("=== pileup-qtl Group Log ===")?;
    logger.log(&format!("Software Version: v{}", VERSION))?;
    logger.log(&format!("Runtime: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")))?;
    logger.log(&format!("Depth table: {}", args.input))?;
    logger.log(&format!("Library sizes: {}", args.libsizes))?;
    logger.log(&format!("Variant: {}", args.variant))?;
    logger.log(&format!("Output File: {}", args.output))?;

    let source = match (&args.dosages, &args.vcf) {
        (Some(d), _) => {
            logger.log(&format!("Dosages: {}", d))?;
            GenotypeSource::Dosages(read_dosages(d)?)
        }
        (None, Some(v)) => {
            logger.log(&format!("VCF: {}", v))?;
            GenotypeSource::VariantFile(PathBuf::from(v))
        }
        (None, None) => return Err("Error: no genotype source given".into()),
    };

    logger.step("Reading depth table and library sizes")?;
    let table = PileupTable::read_csv(&args.input)?;
    let libsizes = read_library_sizes(&args.libsizes)?;
    let residualizer = load_covariates(&args.covariates)?;
    let id_map: Option<IdMap<'_>> = if args.raw_ids { Some(&identity_id_map) } else { None };

    logger.step("Grouping profiles by genotype")?;
    let grouped = group_by_genotype(
        &table,
        &libsizes,
        &args.variant,
        &source,
        residualizer.as_ref().map(|r| r as &dyn ProfileTransform),
        id_map,
    )?;
    grouped.write_csv(&args.output)?;
    logger.end_steps();

    let categories: Vec<String> = grouped.labels.iter().map(|l| l.to_string()).collect();
    logger.log(&format!("Genotype groups: {}", categories.join(", ")))?;
    logger.log(&format_time_used(start.elapsed()))?;
    Ok(())
}

fn run_plot(args: &PlotArgs, logger: &mut Logger) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    logger.log("=== pileup-qtl Plot Log ===")?;
    logger.log(&format!("Software Version: v{}", VERSION))?;
    logger.log(&format!("Runtime: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")))?;
    logger.log(&format!("Profiles: {}", args.profiles.join(", ")))?;
    logger.log(&format!("GTF: {}", args.gtf))?;
    logger.log(&format!("Gene: {}", args.gene))?;
    logger.log(&format!("Output File: {}", args.output))?;

    logger.step("Reading profile tables")?;
    let tables = args
        .profiles
        .iter()
        .map(ProfileTable::read_csv)
        .collect::<Result<Vec<_>, _>>()?;
    logger.step("Loading gene model")?;
    let mut gene = Gene::from_gtf(&args.gtf, &args.gene)?;
    logger.log(&format!(
        "Gene {} {}:{}-{} with {} transcripts",
        gene.name,
        gene.chrom,
        gene.start,
        gene.end,
        gene.transcripts.len()
    ))?;

    let layout = match &args.layout {
        Some(path) => {
            logger.log(&format!("Layout config: {}", path))?;
            LayoutConfig::from_file(path)?
        }
        None => LayoutConfig::default(),
    };
    let shade_range = args.shade.as_ref().map(|s| {
        if s.contains(':') || s.contains('-') {
            Ok(ShadeRange::Region(s.clone()))
        } else {
            s.split(',')
                .map(|p| p.trim().parse::<u64>())
                .collect::<Result<Vec<_>, _>>()
                .map(ShadeRange::Positions)
        }
    });
    let mut options = PlotOptions {
        variant_id: args.variant.clone(),
        order: args.order.parse::<TraceOrder>()?,
        title: args.title.clone(),
        show_variant_pos: args.show_variant_pos,
        max_intron: args.max_intron,
        alpha: args.alpha,
        lw: args.lw,
        outline: args.outline,
        shade_range: shade_range.transpose()?,
        ymax: args.ymax,
        xlim: args.xlim.as_ref().map(|v| (v[0], v[1])),
        labels: args.labels.clone(),
        mappability: args.mappability.as_ref().map(PathBuf::from),
        layout,
        dpi: args.dpi,
        ..PlotOptions::default()
    };
    for text in args.highlight_introns.iter().flatten() {
        options.gene_style.highlight_introns.push(parse_interval(text)?);
    }
    for text in args.highlight_introns2.iter().flatten() {
        options.gene_style.highlight_introns2.push(parse_interval(text)?);
    }

    logger.step("Rendering figure")?;
    let panels = render_to_file(&args.output, &tables, &mut gene, &options)?;
    logger.end_steps();
    logger.log(&format!("Figure written with {} panels", panels.len()))?;
    logger.log(&format_time_used(start.elapsed()))?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Depth(args) => {
            validate_depth_args(&args)?;
            let mut logger = open_logger(&args.log, "depth.log")?;
            let result = run_depth(&args, &mut logger);
            if let Err(e) = &result {
                logger.end_steps();
                logger.log(&format!("Depth extraction failed: {}", e))?;
            }
            result
        }
        Commands::Norm(args) => {
            validate_norm_args(&args)?;
            let mut logger = open_logger(&args.log, "norm.log")?;
            let result = run_norm(&args, &mut logger);
            if let Err(e) = &result {
                logger.end_steps();
                logger.log(&format!("Normalization failed: {}", e))?;
            }
            result
        }
        Commands::Group(args) => {
            validate_group_args(&args)?;
            let mut logger = open_logger(&args.log, "group.log")?;
            let result = run_group(&args, &mut logger);
            if let Err(e) = &result {
                logger.end_steps();
                logger.log(&format!("Grouping failed: {}", e))?;
            }
            result
        }
        Commands::Plot(args) => {
            validate_plot_args(&args)?;
            let mut logger = open_logger(&args.log, "plot.log")?;
            let result = run_plot(&args, &mut logger);
            if let Err(e) = &result {
                logger.end_steps();
                logger.log(&format!("Plotting failed: {}", e))?;
            }
            result
        }
    }
}
