use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use linkrank::config::{self, PipelineConfig};
use linkrank::graph::{self, GraphBackend, MemoryGraph, Neo4jConfig, Neo4jLoader};
use linkrank::pipeline::{self, ShardPlan};
use linkrank::reader::FileSource;
use linkrank::records;
use linkrank::score;
use linkrank::stats::PipelineStats;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "linkrank")]
#[command(about = "Extract Wikipedia link graphs and score pages by inbound links")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract links from a dump and score every linked page
    Index(IndexArgs),
    /// Score pages from an existing adjacency file
    Rank(RankArgs),
    /// Load score and adjacency files into a graph backend
    Graph(GraphArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Path to the uncompressed Wikipedia XML dump
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for links.tsv and pages.tsv
    #[arg(short, long)]
    output: PathBuf,

    /// Number of byte-range shards (overrides the config file)
    #[arg(long, conflicts_with = "split_size")]
    shards: Option<usize>,

    /// Target shard size in bytes instead of a shard count
    #[arg(long)]
    split_size: Option<u64>,

    /// JSON pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Damping factor for scoring (overrides the config file)
    #[arg(long)]
    damping: Option<f32>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Dry run - don't write output files
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct RankArgs {
    /// Adjacency file produced by `index`
    #[arg(short, long)]
    links: PathBuf,

    /// Destination score file
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value_t = config::DAMPING_FACTOR)]
    damping: f32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Neo4j,
    Memory,
}

#[derive(Args)]
struct GraphArgs {
    /// Score file (vertices)
    #[arg(long)]
    pages: PathBuf,

    /// Adjacency file (edges)
    #[arg(long)]
    links: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Neo4j)]
    backend: Backend,

    /// Neo4j Bolt URI
    #[arg(long, default_value = config::DEFAULT_BOLT_URI)]
    bolt_uri: String,

    #[arg(long, default_value = config::DEFAULT_NEO4J_USER)]
    user: String,

    #[arg(long, default_value = "")]
    password: String,

    /// Rows per UNWIND batch
    #[arg(long, default_value_t = config::GRAPH_BATCH_SIZE)]
    batch_size: usize,

    /// Max batches in flight
    #[arg(long, default_value_t = config::GRAPH_MAX_PARALLEL)]
    max_parallel: usize,
}

fn load_config(args: &IndexArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(shards) = args.shards {
        config.shards = shards;
    }
    if let Some(damping) = args.damping {
        config.scoring.damping = damping;
    }
    config.validate()?;
    Ok(config)
}

fn make_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shards")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

fn run_index(args: IndexArgs) -> Result<()> {
    let config = load_config(&args)?;
    let plan = match args.split_size {
        Some(0) => bail!("Split size must be positive"),
        Some(size) => ShardPlan::SplitSize(size),
        None => ShardPlan::Count(config.shards),
    };

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    let source = FileSource::new(&args.input);
    let stats = PipelineStats::new();
    let progress = make_progress_bar();

    info!(input = ?args.input, "Starting pipeline");
    let start = Instant::now();
    let output = pipeline::run_pipeline(&source, plan, &config, &stats, &progress)?;
    let duration = start.elapsed();

    if !output.is_complete() {
        for failure in &output.failures {
            eprintln!("{}: {:#}", failure.shard, failure.error);
        }
        bail!(
            "{} of {} shards failed; no output written",
            output.failures.len(),
            stats.shards() + stats.failed_shards()
        );
    }

    if !args.dry_run {
        fs::create_dir_all(&args.output)
            .with_context(|| format!("Failed to create output directory: {:?}", args.output))?;
        let links_path = args.output.join(config::LINKS_FILE_NAME);
        let pages_path = args.output.join(config::PAGES_FILE_NAME);
        records::write_adjacency_file(&links_path, &output.adjacency)?;
        records::write_scores_file(&pages_path, &output.scores)?;
        info!(links = ?links_path, pages = ?pages_path, "Wrote output files");
    } else {
        info!("Dry run, skipping output files");
    }

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", duration.as_secs_f64());
    println!();
    println!("Shards processed:   {}", stats.shards());
    println!("Records read:       {}", stats.records());
    println!("Content pages:      {}", stats.documents());
    println!("Pages skipped:      {}", stats.skipped());
    println!("Links extracted:    {}", stats.links());
    println!("Links rejected:     {}", stats.rejected_links());
    println!("Linking pages:      {}", stats.adjacency());
    println!("Scored pages:       {}", stats.scores());

    Ok(())
}

fn run_rank(args: RankArgs) -> Result<()> {
    let config = PipelineConfig {
        scoring: config::ScoreConfig {
            damping: args.damping,
        },
        ..PipelineConfig::default()
    };
    config.validate()?;

    let start = Instant::now();
    let adjacency = records::read_adjacency_file(&args.links)?;
    info!(sources = adjacency.len(), "Loaded adjacency records");

    let scores = score::score_all(&adjacency, &config.scoring);
    records::write_scores_file(&args.output, &scores)?;

    println!("Scored pages:       {}", scores.len());
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn check_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Input file not found: {:?}", path);
    }
    Ok(())
}

fn run_graph(args: GraphArgs) -> Result<()> {
    check_exists(&args.pages)?;
    check_exists(&args.links)?;

    let mut backend = match args.backend {
        Backend::Neo4j => GraphBackend::Neo4j(Neo4jLoader::new(Neo4jConfig {
            bolt_uri: args.bolt_uri,
            user: args.user,
            password: args.password,
            batch_size: args.batch_size,
            max_parallel: args.max_parallel,
        })),
        Backend::Memory => GraphBackend::Memory(MemoryGraph::new()),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("linkrank-graph-worker")
        .enable_io()
        .enable_time()
        .build()?;

    let start = Instant::now();
    let summary = rt.block_on(graph::load_graph(&mut backend, &args.pages, &args.links))?;

    println!("Vertices loaded:    {}", summary.vertices);
    println!("Edges loaded:       {}", summary.edges);
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Index(args) => run_index(args),
        Commands::Rank(args) => run_rank(args),
        Commands::Graph(args) => run_graph(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
