// -----------------------------------------------------------------------------
// s3-load-bench - throughput benchmark for S3-compatible object storage
// -----------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use s3_load_bench::config::{BenchmarkConfig, Mode};
use s3_load_bench::constants::{
    DEFAULT_DELTA_SECS, DEFAULT_DURATION_SECS, DEFAULT_ENDPOINT, DEFAULT_FOLDER_CAPACITY,
    DEFAULT_KEY_ROOT, DEFAULT_LOOPS, DEFAULT_REGION, DEFAULT_SEED, DEFAULT_SEQUENTIAL_BUCKET,
    DEFAULT_STAGGERED_BUCKET, DEFAULT_THREADS,
};
use s3_load_bench::generator::FolderCapacity;
use s3_load_bench::orchestrator::{BenchmarkOrchestrator, RunSummary};
use s3_load_bench::s3::S3Backend;
use s3_load_bench::size_parser::{format_bytes, parse_size};
use s3_load_bench::tsv_export::TsvExporter;
use tokio::runtime::Builder as RtBuilder;
use tracing::info;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "s3-load-bench", version, about = "Load generator for S3-compatible object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Export one TSV row per phase to this file
    #[arg(long, value_name = "PATH", global = true)]
    results_tsv: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// PUT, GET, LIST v2, LIST versions and DELETE phases, one after another
    ///
    /// Examples:
    ///   s3-load-bench sequential -a AKID --secret-key SECRET -u http://minio:9000 -t 16 -z 4M
    ///   s3-load-bench sequential -d 30 -l 3 --results-tsv /tmp/run.tsv
    Sequential(SequentialArgs),
    /// Lanes of PUT/GET/LIST/DELETE workers started `delta` apart
    ///
    /// put     --------------------
    /// get         --------------------
    /// list            --------------------
    /// delete              --------------------
    ///         |...| delta (-d)
    ///         |..................| duration (-s)
    ///
    /// Keys look like UUID1/UUID2/blocks/HEX3/NUM4.HEX5.HEX6.blk, so
    /// f1 x f2 x f3 is the largest number of objects inside one UUID1 folder.
    #[command(verbatim_doc_comment)]
    Staggered(StaggeredArgs),
    /// Run from a YAML config file
    ///
    /// Examples:
    ///   s3-load-bench run --config bench.yaml
    Run {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct Credentials {
    /// Access key
    #[arg(short = 'a', long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: String,

    /// Secret key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: String,
}

#[derive(Args)]
struct SequentialArgs {
    #[command(flatten)]
    credentials: Credentials,

    /// URL for host with method prefix
    #[arg(short = 'u', long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bucket for testing
    #[arg(short = 'b', long, default_value = DEFAULT_SEQUENTIAL_BUCKET)]
    bucket: String,

    /// Region for testing
    #[arg(short = 'r', long, default_value = DEFAULT_REGION)]
    region: String,

    /// Duration of each phase in seconds
    #[arg(short = 'd', long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    /// Number of workers per phase
    #[arg(short = 't', long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Number of times to repeat the phases
    #[arg(short = 'l', long, default_value_t = DEFAULT_LOOPS)]
    loops: u32,

    /// Object size with optional K, M, G suffix
    #[arg(short = 'z', long, default_value = "1M", value_parser = parse_size)]
    size: u64,

    /// Seed for GET and LIST object selection
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

#[derive(Args)]
struct StaggeredArgs {
    #[command(flatten)]
    credentials: Credentials,

    /// Endpoint URL
    #[arg(short = 'u', long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bucket name
    #[arg(short = 'b', long, default_value = DEFAULT_STAGGERED_BUCKET)]
    bucket: String,

    /// Region handed to the listing client
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// Number of lanes
    #[arg(short = 'n', long, default_value_t = DEFAULT_THREADS)]
    lanes: usize,

    /// Duration of each worker in seconds (min 4)
    #[arg(short = 's', long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    /// Start offset between a lane's workers in seconds (min 1)
    #[arg(short = 'd', long, default_value_t = DEFAULT_DELTA_SECS)]
    delta: u64,

    /// Initial seed; lane N uses seed + N (min 1)
    #[arg(short = 'r', long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Largest number of entries inside a 1st level uuid folder (min 2)
    #[arg(long, default_value_t = DEFAULT_FOLDER_CAPACITY)]
    f1: u16,

    /// Largest number of entries inside a 2nd level uuid folder (min 2)
    #[arg(long, default_value_t = DEFAULT_FOLDER_CAPACITY)]
    f2: u16,

    /// Largest number of entries inside a 3rd level hex folder (min 2)
    #[arg(long, default_value_t = DEFAULT_FOLDER_CAPACITY)]
    f3: u16,

    /// Prefix prepended to every generated key
    #[arg(long, default_value = DEFAULT_KEY_ROOT)]
    key_root: String,
}

impl SequentialArgs {
    fn into_config(self) -> BenchmarkConfig {
        let mut cfg = BenchmarkConfig::new(
            Mode::Sequential,
            self.credentials.access_key,
            self.credentials.secret_key,
        );
        cfg.endpoint = self.endpoint;
        cfg.bucket = Some(self.bucket);
        cfg.region = self.region;
        cfg.duration = Duration::from_secs(self.duration);
        cfg.threads = self.threads;
        cfg.loops = self.loops;
        cfg.object_size = self.size;
        cfg.seed = self.seed;
        cfg
    }
}

impl StaggeredArgs {
    fn into_config(self) -> BenchmarkConfig {
        let mut cfg = BenchmarkConfig::new(
            Mode::Staggered,
            self.credentials.access_key,
            self.credentials.secret_key,
        );
        cfg.endpoint = self.endpoint;
        cfg.bucket = Some(self.bucket);
        cfg.region = self.region;
        cfg.threads = self.lanes;
        cfg.duration = Duration::from_secs(self.duration);
        cfg.delta = Duration::from_secs(self.delta);
        cfg.seed = self.seed;
        cfg.folders = FolderCapacity::new(self.f1, self.f2, self.f3);
        cfg.key_root = self.key_root;
        cfg
    }
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Progress lines are info level, so that is the default for this crate.
    // SDK crates stay at warn unless tracing everything.
    let (bench_level, sdk_level) = match cli.verbose {
        0 => ("info", "warn"),
        1 => ("debug", "warn"),
        _ => ("trace", "debug"),
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::new(format!(
        "s3_load_bench={},aws_config={},aws_sdk_s3={},aws_smithy_runtime={}",
        bench_level, sdk_level, sdk_level, sdk_level
    ));
    fmt().with_env_filter(filter).init();

    let cfg = match cli.command {
        Commands::Sequential(args) => args.into_config(),
        Commands::Staggered(args) => args.into_config(),
        Commands::Run { config } => BenchmarkConfig::from_file(&config)?,
    };
    cfg.validate()?;

    let object_size = match cfg.mode {
        Mode::Sequential => cfg.object_size,
        Mode::Staggered => 0,
    };

    let rt = RtBuilder::new_multi_thread().enable_all().build()?;
    let summary = rt.block_on(run_benchmark(cfg))?;

    if let Some(path) = cli.results_tsv {
        TsvExporter::new(&path)
            .export_results(&summary.phases, object_size)
            .context("Failed to export TSV results")?;
    }
    Ok(())
}

async fn run_benchmark(cfg: BenchmarkConfig) -> Result<RunSummary> {
    match cfg.mode {
        Mode::Sequential => println!(
            "Parameters: url={}, bucket={}, region={}, duration={}, threads={}, loops={}, size={}",
            cfg.endpoint_url(),
            cfg.bucket(),
            cfg.region,
            cfg.duration.as_secs(),
            cfg.threads,
            cfg.loops,
            format_bytes(cfg.object_size)
        ),
        Mode::Staggered => println!(
            "Parameters: url={}, bucket={}, lanes={}, duration={}, delta={}, seed={}, folders={}x{}x{}",
            cfg.endpoint_url(),
            cfg.bucket(),
            cfg.threads,
            cfg.duration.as_secs(),
            cfg.delta.as_secs(),
            cfg.seed,
            cfg.folders.folder1,
            cfg.folders.folder2,
            cfg.folders.folder3
        ),
    }

    let backend = S3Backend::new(&cfg).await?;
    backend.create_bucket(true).await?;
    if cfg.mode == Mode::Sequential {
        let removed = backend.delete_all_objects().await?;
        info!("Removed {} existing object versions", removed);
    }

    let orchestrator = BenchmarkOrchestrator::new(cfg, Arc::new(backend));
    orchestrator.run().await
}
