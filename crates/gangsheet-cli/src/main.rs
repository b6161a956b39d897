use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use gangsheet_core::config::{EngineConfig, JobConfig, PrinterSpec, Spacing};
use gangsheet_core::engine::{PackEngine, build_work_items};
use gangsheet_core::memory::MemoryGovernor;
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "gangsheet",
    about = "Pack print-ready raster designs onto gang sheets",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack a job's designs onto one or more sheet parts
    Pack(PackArgs),
    /// Print the current memory status and governor recommendations
    Mem(MemArgs),
}

#[derive(Parser, Debug, Clone)]
struct PackArgs {
    // Input/Output
    /// YAML job file (titles/sizes/totals + printer), or a directory of
    /// images packed one copy each
    #[arg(help_heading = "Input/Output")]
    input: PathBuf,
    /// Output directory
    #[arg(short, long, default_value = "out", help_heading = "Input/Output")]
    out_dir: PathBuf,
    /// Leading free text of output file names
    #[arg(long, default_value = "gangsheet", help_heading = "Input/Output")]
    prefix: String,

    // Job
    /// Template key used in output file names
    #[arg(long, default_value = "DTF", help_heading = "Job")]
    template: String,
    /// Printer max width (inches)
    #[arg(long, default_value_t = 22.0, help_heading = "Job")]
    max_width: f64,
    /// Printer max height (inches)
    #[arg(long, default_value_t = 120.0, help_heading = "Job")]
    max_height: f64,
    /// Working DPI
    #[arg(long, default_value_t = 300, help_heading = "Job")]
    dpi: u32,
    /// Horizontal spacing between designs (inches)
    #[arg(long, default_value_t = 0.5, help_heading = "Job")]
    spacing_width: f64,
    /// Vertical spacing between designs (inches)
    #[arg(long, default_value_t = 0.5, help_heading = "Job")]
    spacing_height: f64,
    /// Output DPI (defaults to the working DPI)
    #[arg(long, help_heading = "Job")]
    target_dpi: Option<u32>,
    /// Copies per design when the input is a directory
    #[arg(long, default_value_t = 1, help_heading = "Job")]
    copies: u32,
    /// Write JSON layer manifests next to rasters
    #[arg(long, default_value_t = true, action=ArgAction::Set, help_heading = "Job")]
    manifest: bool,
}

#[derive(Parser, Debug, Clone)]
struct MemArgs {
    /// Projected allocation to evaluate (MB)
    #[arg(long, default_value_t = 512)]
    needed_mb: u64,
}

/// YAML job file: the same ordered lists the web layer would hand the engine.
#[derive(Debug, Deserialize)]
struct JobFile {
    titles: Vec<String>,
    #[serde(default)]
    sizes: Option<Vec<String>>,
    #[serde(default)]
    totals: Option<Vec<u32>>,
    #[serde(default)]
    template_key: Option<String>,
    #[serde(default)]
    job_prefix: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    printer: Option<PrinterSpec>,
    #[serde(default)]
    spacing: Option<Spacing>,
    #[serde(default)]
    target_dpi: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Pack(args) => run_pack(args),
        Commands::Mem(args) => run_mem(args),
    }
}

fn run_pack(cli: &PackArgs) -> anyhow::Result<()> {
    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create out_dir {}", cli.out_dir.display()))?;

    let (titles, sizes, totals, job) = if cli.input.is_file() {
        load_job_file(cli)?
    } else {
        gather_directory_job(cli)?
    };
    info!(items = titles.len(), "loaded job input");

    let items = build_work_items(&titles, &sizes, totals.as_deref())?;
    let engine_cfg = EngineConfig::from_env();
    let mut engine = PackEngine::new(job, engine_cfg)?;
    let result = engine.run(items, &cli.out_dir)?;

    let stats = result.stats();
    info!(
        parts = result.sheet_parts_created,
        occupancy = format!("{:.2}%", stats.occupancy * 100.0),
        "done"
    );
    if !result.success {
        if let Some(rec) = &result.recommendation {
            warn!(recommendation = rec, "job aborted with a partial result");
        }
        anyhow::bail!(
            "job aborted after {} sheet part(s): {}",
            result.sheet_parts_created,
            result.error.unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(())
}

fn run_mem(args: &MemArgs) -> anyhow::Result<()> {
    let cfg = EngineConfig::from_env();
    let mut governor = MemoryGovernor::new(cfg.memory_ceiling_pct);
    let status = governor.check();
    let recs = governor.recommendations(args.needed_mb * (1 << 20));
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("{}", serde_json::to_string_pretty(&recs)?);
    Ok(())
}

fn load_job_file(cli: &PackArgs) -> anyhow::Result<(Vec<String>, Vec<String>, Option<Vec<u32>>, JobConfig)> {
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("read job file {}", cli.input.display()))?;
    let file: JobFile = serde_yaml::from_str(&text)
        .with_context(|| format!("parse job file {}", cli.input.display()))?;

    // Relative titles resolve against the job file's directory.
    let base = cli.input.parent().unwrap_or_else(|| Path::new("."));
    let titles: Vec<String> = file
        .titles
        .iter()
        .map(|t| {
            let p = Path::new(t);
            if p.is_absolute() {
                t.clone()
            } else {
                base.join(p).to_string_lossy().into_owned()
            }
        })
        .collect();
    let sizes = file
        .sizes
        .unwrap_or_else(|| vec![cli.template.clone(); titles.len()]);

    let mut builder = JobConfig::builder(file.template_key.unwrap_or_else(|| cli.template.clone()))
        .job_prefix(file.job_prefix.unwrap_or_else(|| cli.prefix.clone()))
        .target_dpi(file.target_dpi.or(cli.target_dpi))
        .write_manifest(cli.manifest);
    if let Some(label) = file.label {
        builder = builder.label(label);
    }
    let printer = file.printer.unwrap_or(PrinterSpec {
        max_width_inches: cli.max_width,
        max_height_inches: cli.max_height,
        dpi: cli.dpi,
    });
    let spacing = file.spacing.unwrap_or(Spacing {
        width_inches: cli.spacing_width,
        height_inches: cli.spacing_height,
    });
    let job = builder
        .printer(printer.max_width_inches, printer.max_height_inches, printer.dpi)
        .spacing(spacing.width_inches, spacing.height_inches)
        .build();
    Ok((titles, sizes, file.totals, job))
}

fn gather_directory_job(
    cli: &PackArgs,
) -> anyhow::Result<(Vec<String>, Vec<String>, Option<Vec<u32>>, JobConfig)> {
    let mut titles: Vec<String> = Vec::new();
    for entry in WalkDir::new(&cli.input).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            titles.push(entry.path().to_string_lossy().into_owned());
        }
    }
    if titles.is_empty() {
        anyhow::bail!("no images found under {}", cli.input.display());
    }
    let sizes = vec![cli.template.clone(); titles.len()];
    let totals = Some(vec![cli.copies; titles.len()]);
    let job = JobConfig::builder(cli.template.clone())
        .job_prefix(cli.prefix.clone())
        .printer(cli.max_width, cli.max_height, cli.dpi)
        .spacing(cli.spacing_width, cli.spacing_height)
        .target_dpi(cli.target_dpi)
        .write_manifest(cli.manifest)
        .build();
    Ok((titles, sizes, totals, job))
}

fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init();
}
