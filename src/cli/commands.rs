//! CLI command definitions for lmd-pipeline.
//!
//! `run` drives every scenario under the base output data directory to a
//! luminosity fit; the other commands are diagnostics for operators.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::info;

use crate::artifacts::{ArtifactProber, FileListBuncher, ProbePolicy, SIMULATION_OUTPUT_GLOB};
use crate::pipeline::{discover_scenarios, PipelineConfig, Scenario, ScenarioOrchestrator};
use crate::scheduler::{LoopReport, ScenarioScheduler, SlurmJobQueue};
use crate::tools::{BunchRequest, Buncher, Toolchain};

/// Default fit configuration, relative to the lmdfit directory.
const DEFAULT_FIT_CONFIG: &str = "fitconfig-fast.json";

/// Resumable luminosity determination over simulated scenario directories.
#[derive(Parser)]
#[command(name = "lmd-pipeline")]
#[command(about = "Drive simulation scenarios through vertex, IP, angular and fit stages")]
#[command(version)]
#[command(
    long_about = "lmd-pipeline discovers elastic-scattering scenario directories and drives each one through vertex data creation, interaction point determination, angular and acceptance data creation, and the luminosity fit.\n\nAll progress is read back from the filesystem, so an interrupted run can simply be restarted.\n\nExample usage:\n  lmd-pipeline run --base-output-data-dir /data/lmd --use-devel-queue"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Discover scenarios and drive them to completion.
    Run(RunArgs),

    /// List the scenario directories `run` would pick up.
    Scan(ScanArgs),

    /// Classify one simulation output directory as READY, WAITING or FAILED.
    Probe(ProbeArgs),

    /// Write file-list bunches for simulation output under a directory.
    Bunch(BunchArgs),
}

/// Arguments for `lmd-pipeline run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Base directory for scenarios and simulation output.
    #[arg(long, env = "LMDFIT_DATA_DIR")]
    pub base_output_data_dir: Option<PathBuf>,

    /// Fit configuration file, relative to the lmdfit directory.
    #[arg(long, default_value = DEFAULT_FIT_CONFIG)]
    pub fit_config: PathBuf,

    /// Number of events per box-generator sample.
    #[arg(long, default_value = "500000")]
    pub box_num_events_per_sample: u64,

    /// Number of box-generator samples to simulate.
    #[arg(long, default_value = "100")]
    pub box_num_samples: u64,

    /// Number of elastic data files to reconstruct (-1 means all).
    #[arg(long, default_value = "100", allow_negative_numbers = true)]
    pub num_samples: i64,

    /// Submit to the development queue.
    #[arg(long)]
    pub use_devel_queue: bool,

    /// Seconds to wait between scheduling rounds.
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Fraction of expected output files required to treat a stage as done.
    #[arg(long)]
    pub required_fraction: Option<f64>,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `lmd-pipeline scan`.
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Base directory to search.
    #[arg(long, env = "LMDFIT_DATA_DIR")]
    pub base_output_data_dir: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `lmd-pipeline probe`.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Simulation output directory.
    pub dir: PathBuf,

    /// Filename glob of the output files.
    #[arg(long, default_value = SIMULATION_OUTPUT_GLOB)]
    pub pattern: String,

    /// Expected number of files when the directory name has no job range.
    #[arg(long)]
    pub job_count: Option<usize>,

    /// Fraction of expected files required for READY.
    #[arg(long)]
    pub required_fraction: Option<f64>,

    /// Files at or below this size (bytes) count as broken.
    #[arg(long)]
    pub min_file_size: Option<u64>,

    /// Batch user whose jobs are counted.
    #[arg(long, env = "LMDFIT_QUEUE_USER")]
    pub user: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `lmd-pipeline bunch`.
#[derive(Parser, Debug)]
pub struct BunchArgs {
    /// Directory tree holding simulation output.
    pub dir: PathBuf,

    /// Number of files per file list.
    #[arg(long, default_value = "10")]
    pub files_per_bunch: usize,

    /// Cap on the number of files taken per directory.
    #[arg(long)]
    pub maximum_number_of_files: Option<usize>,

    /// Comma-separated keywords the directory path must contain.
    #[arg(long, value_delimiter = ',')]
    pub keywords: Vec<String>,

    /// Files at or below this size (bytes) count as broken.
    #[arg(long)]
    pub min_file_size: Option<u64>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Scan(args) => run_scan_command(args),
        Commands::Probe(args) => run_probe_command(args).await,
        Commands::Bunch(args) => run_bunch_command(args),
    }
}

/// Applies `run` options on top of the environment configuration.
fn build_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?
        .with_fit_config(args.fit_config.clone())
        .with_box_samples(args.box_num_samples, args.box_num_events_per_sample)
        .with_num_samples(args.num_samples)
        .with_devel_queue(args.use_devel_queue);
    if let Some(ref dir) = args.base_output_data_dir {
        config = config.with_base_output_data_dir(dir.clone());
    }
    if let Some(secs) = args.poll_interval_secs {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(fraction) = args.required_fraction {
        config = config.with_required_file_fraction(fraction);
    }
    config.validate()?;
    Ok(config)
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;

    let dirs = discover_scenarios(&config.base_output_data_dir);
    info!(
        base = %config.base_output_data_dir.display(),
        scenarios = dirs.len(),
        "Discovered scenarios"
    );
    if dirs.is_empty() {
        println!(
            "No scenarios found under {}",
            config.base_output_data_dir.display()
        );
        return Ok(());
    }

    let poll_interval = config.poll_interval;
    let orchestrator = ScenarioOrchestrator::new(config.clone(), Toolchain::from_config(&config));
    let mut scheduler = ScenarioScheduler::new(dirs.into_iter().map(Scenario::new), poll_interval);
    let report = scheduler.run(&orchestrator).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn report_json(report: &LoopReport) -> serde_json::Value {
    json!({
        "rounds": report.rounds,
        "sleeps": report.sleeps,
        "finished": report.finished,
        "dead": report.dead,
        "started_at": report.started_at.to_rfc3339(),
        "finished_at": report.finished_at.to_rfc3339(),
    })
}

fn print_report(report: &LoopReport) {
    println!("=== Luminosity pipeline summary ===");
    println!("Rounds:   {}", report.rounds);
    println!("Sleeps:   {}", report.sleeps);
    println!("Elapsed:  {}s", report.elapsed().num_seconds());
    println!("Finished: {}", report.finished.len());
    for dir in &report.finished {
        println!("  {}", dir.display());
    }
    println!("Dead:     {}", report.dead.len());
    for dir in &report.dead {
        println!("  {}", dir.display());
    }
}

fn run_scan_command(args: ScanArgs) -> anyhow::Result<()> {
    if !args.base_output_data_dir.exists() {
        return Err(anyhow::anyhow!(
            "Base output data directory does not exist: {}",
            args.base_output_data_dir.display()
        ));
    }

    let dirs = discover_scenarios(&args.base_output_data_dir);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&dirs)?);
    } else {
        for dir in &dirs {
            println!("{}", dir.display());
        }
        println!("{} scenario(s)", dirs.len());
    }
    Ok(())
}

async fn run_probe_command(args: ProbeArgs) -> anyhow::Result<()> {
    let mut policy = ProbePolicy::default();
    if let Some(fraction) = args.required_fraction {
        policy.required_fraction = fraction;
    }
    if let Some(bytes) = args.min_file_size {
        policy.min_file_size = bytes;
    }

    let user = args.user.or_else(|| std::env::var("USER").ok());
    let queue = SlurmJobQueue::new(user);
    let report = ArtifactProber::new(policy)
        .probe(&args.dir, &args.pattern, args.job_count, &queue)
        .await?;

    if args.json {
        let value = json!({
            "dir": args.dir,
            "status": report.status.to_string(),
            "good": report.good,
            "bad": report.bad,
            "expected": report.expected,
            "pending_jobs": report.pending_jobs,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}: {}", args.dir.display(), report.status);
        println!("  good files:   {}", report.good);
        println!("  bad files:    {}", report.bad);
        println!("  expected:     {}", report.expected);
        if let Some(pending) = report.pending_jobs {
            println!("  pending jobs: {}", pending);
        }
    }
    Ok(())
}

fn run_bunch_command(args: BunchArgs) -> anyhow::Result<()> {
    let buncher = match args.min_file_size {
        Some(bytes) => FileListBuncher::new(bytes),
        None => FileListBuncher::default(),
    };
    let keywords: Vec<&str> = args.keywords.iter().map(String::as_str).collect();
    let summary = buncher.bunch(&BunchRequest {
        root: &args.dir,
        dir_keywords: &keywords,
        files_per_bunch: args.files_per_bunch,
        max_files: args.maximum_number_of_files,
    })?;

    for entry in &summary.directories {
        println!(
            "{}: {} list(s) from {} good file(s), {} bad",
            entry.bunch_dir.display(),
            entry.lists,
            entry.good,
            entry.bad
        );
    }
    println!("Bunched {} directory(ies)", summary.directories.len());
    Ok(())
}
