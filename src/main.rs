use clap::{ArgAction, Parser, ValueEnum};
use env_logger::{Builder, Env};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};

use phenoage_actuary::{io, pipeline, PipelineConfig};

static GOLD_PATH: &str = "data/output/gold/";
static REPORT_FILE_NAME: &str = "phenoage_report";
static SUMMARY_FILE_NAME: &str = "phenoage_summary.csv";

#[derive(Parser, Debug)]
#[clap(
    name = "phenoage-actuary",
    version,
    about = "Phenotypic age and actuarial risk separation from survey biomarkers."
)]
struct Args {
    /// Directory holding the exported source tables named in the configuration.
    data_dir: PathBuf,

    /// JSON file overriding the built-in configuration.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Output table path. Defaults to the gold output directory.
    #[clap(short, long)]
    output: Option<PathBuf>,

    #[clap(short, long, value_enum, default_value_t = WriteFormat::Csv)]
    format: WriteFormat,

    /// Summary CSV path. Defaults to the gold output directory.
    #[clap(long)]
    summary: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WriteFormat {
    Csv,
    Parquet,
}

impl WriteFormat {
    fn extension(self) -> &'static str {
        match self {
            WriteFormat::Csv => "csv",
            WriteFormat::Parquet => "parquet",
        }
    }
}

/// Resident memory of this process in bytes, or 0 when it cannot be read.
fn monitor_memory() -> u64 {
    let Ok(pid) = get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|process| process.memory()).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(default_level)).init();
    debug!("Arguments {:#?}", args);

    let start_time = Instant::now();
    let start_memory = monitor_memory();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let tables = io::load_sources(&args.data_dir, &config.sources).await?;
    let mut output = pipeline::run(&tables, &config)?;

    println!("{}", output.summary);
    println!("{}", output.frame.head(Some(5)));

    let output_path = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(GOLD_PATH).join(format!("{}.{}", REPORT_FILE_NAME, args.format.extension()))
    });
    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| PathBuf::from(GOLD_PATH).join(SUMMARY_FILE_NAME));
    for path in [&output_path, &summary_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    match args.format {
        WriteFormat::Csv => io::write_csv(&output_path, &mut output.frame).await?,
        WriteFormat::Parquet => io::write_parquet(&output_path, &mut output.frame).await?,
    }
    io::write_summary(&summary_path, &output.summary)?;
    info!(
        "Results saved to {} (summary: {})",
        output_path.display(),
        summary_path.display()
    );

    let end_memory = monitor_memory();
    let duration = start_time.elapsed();

    println!("Time elapsed: {:?}", duration);
    println!("Memory used: {} bytes", end_memory.saturating_sub(start_memory));

    Ok(())
}
