use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use theseus::cache;
use theseus::chunker::TextSplitter;
use theseus::config::{ChunkConfig, SiteConfig};
use theseus::embed::{self, EmbedderBackend, EmbedderConfig};
use theseus::exclusions::ExclusionRules;
use theseus::export::export_partitioned;
use theseus::index::TitleIndex;
use theseus::namespace::NamespaceCatalog;
use theseus::parser::discover_dump;
use theseus::pipeline::collect_passages;
use theseus::stats::PipelineStats;
use theseus::store::build_store;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "theseus")]
#[command(about = "Chunk and embed MediaWiki exports, then search them semantically")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the title index and passage vector index from an export
    Build(BuildArgs),
    /// Query the built vector index
    Search(SearchArgs),
    /// Write the index as fixed-size part files plus a manifest
    Export(ExportArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Path to the export (.xml or .xml.bz2), or a directory to search
    #[arg(short, long, default_value = "data")]
    input: PathBuf,

    /// Output directory for caches and artifacts
    #[arg(short, long)]
    output: PathBuf,

    /// Site display name, used in export manifests
    #[arg(long, default_value = "MediaWiki site")]
    site_name: String,

    /// Site base URL, used for canonical links
    #[arg(long, default_value = "https://example.org")]
    site_url: String,

    /// Exclusion rules file
    #[arg(long, default_value = theseus::config::DEFAULT_EXCLUDE_FILE)]
    exclude: PathBuf,

    /// Additionally exclude these numeric namespace ids
    #[arg(long = "exclude-ns-id")]
    exclude_ns_ids: Vec<String>,

    /// Passage size in characters
    #[arg(long, default_value_t = theseus::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Overlap between adjacent passages in characters
    #[arg(long, default_value_t = theseus::config::DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Passages embedded per batch
    #[arg(long, default_value_t = theseus::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Embedding dimension
    #[arg(long, default_value_t = theseus::config::DEFAULT_EMBEDDING_DIMENSION)]
    dimension: usize,

    /// Skip L2 normalization of embeddings (scores stop being cosine)
    #[arg(long)]
    no_normalize: bool,

    /// Pre-tokenize text into script runs before embedding (for CJK wikis)
    #[arg(long)]
    segment_cjk: bool,

    /// Use an OpenAI-compatible embedding endpoint instead of the local
    /// hashing embedder (requires OPENAI_API_KEY)
    #[arg(long, requires = "remote_model")]
    remote_endpoint: Option<String>,

    /// Model name for the remote embedding endpoint
    #[arg(long, requires = "remote_endpoint")]
    remote_model: Option<String>,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Force rebuild, ignoring caches
    #[arg(long)]
    no_cache: bool,

    /// Clear the output directory before starting
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Output directory holding the built index
    #[arg(short, long)]
    output: PathBuf,

    /// Number of results to return
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Minimum similarity score; results below it are dropped
    #[arg(long)]
    score_threshold: Option<f32>,
}

#[derive(Args)]
struct ExportArgs {
    /// Output directory holding the built index
    #[arg(short, long)]
    output: PathBuf,

    /// Directory for part files and manifest (default: <output>/export)
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Passages per part file
    #[arg(long, default_value_t = theseus::config::DEFAULT_PASSAGES_PER_PART)]
    passages_per_part: usize,
}

fn run_build(args: BuildArgs) -> Result<()> {
    if args.clean && args.output.exists() {
        info!("Cleaning output directory: {}", args.output.display());
        fs::remove_dir_all(&args.output).with_context(|| {
            format!("Failed to clean output directory: {}", args.output.display())
        })?;
    }

    fs::create_dir_all(&args.output).with_context(|| {
        format!("Failed to create output directory: {}", args.output.display())
    })?;

    let input = discover_dump(&args.input)?;
    info!("Using export: {}", input.display());

    let site = SiteConfig::new(args.site_name.clone(), args.site_url.clone());
    let chunk = ChunkConfig {
        chunk_size: args.chunk_size,
        overlap: args.chunk_overlap,
    };
    anyhow::ensure!(
        chunk.overlap < chunk.chunk_size,
        "--chunk-overlap must be smaller than --chunk-size"
    );

    let embedder_config = EmbedderConfig {
        backend: match (args.remote_endpoint, args.remote_model) {
            (Some(endpoint), Some(model)) => EmbedderBackend::Remote { endpoint, model },
            _ => EmbedderBackend::Hashing,
        },
        dimension: args.dimension,
        normalize: !args.no_normalize,
        segment_cjk: args.segment_cjk,
    };

    let catalog = NamespaceCatalog::parse(&input)?;
    if catalog.is_empty() {
        warn!("No namespace declarations found; all pages get synthetic labels");
    }

    let mut rules = ExclusionRules::load(&args.exclude)?;
    rules.add_namespace_ids(args.exclude_ns_ids.clone());

    let stats = PipelineStats::new();

    let start_titles = Instant::now();
    let title_cache = cache::title_cache_path(&args.output);
    let title_index = if args.no_cache {
        info!("Cache disabled, building fresh title index");
        let index = TitleIndex::build(&input, &catalog, &rules, &stats)?;
        if let Err(e) = cache::save_title_index(&index, &input, &args.output) {
            warn!(error = %e, "Failed to save title index cache");
        }
        index
    } else if let Some(index) = cache::try_load_title_index(&title_cache, &input)? {
        index
    } else {
        info!("Building title index (cache miss or invalid)");
        let index = TitleIndex::build(&input, &catalog, &rules, &stats)?;
        if let Err(e) = cache::save_title_index(&index, &input, &args.output) {
            warn!(error = %e, "Failed to save title index cache");
        }
        index
    };
    cache::write_titles_csv(&title_index, &args.output)?;
    let title_duration = start_titles.elapsed();

    let start_index = Instant::now();
    let store_cache = cache::store_cache_path(&args.output);
    let cached_store = if args.no_cache {
        None
    } else {
        cache::try_load_store(&store_cache, &input, &chunk, &embedder_config)?
    };

    let store = match cached_store {
        Some(store) => store,
        None => {
            let splitter = TextSplitter::new(chunk);
            let passages = collect_passages(
                &input, &catalog, &rules, &splitter, &site, args.limit, &stats,
            )?;

            let embedder = embed::from_config(&embedder_config)?;

            // Embedding is one long blocking call per batch; a steady-tick
            // spinner keeps the terminal alive and is joined on finish.
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_message("embedding passages");
            pb.enable_steady_tick(Duration::from_millis(120));
            let result = build_store(&passages, embedder.as_ref(), args.batch_size);
            pb.finish_and_clear();
            let store = result?;

            if let Err(e) = cache::save_store(
                &store,
                &input,
                &args.output,
                site.clone(),
                chunk,
                embedder_config.clone(),
            ) {
                warn!(error = %e, "Failed to save vector store cache");
            }
            store
        }
    };
    let index_duration = start_index.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Title pass time:     {:.2}s", title_duration.as_secs_f64());
    println!("Index build time:    {:.2}s", index_duration.as_secs_f64());
    println!(
        "Total time:          {:.2}s",
        (title_duration + index_duration).as_secs_f64()
    );
    println!();
    println!("Titles indexed:      {}", title_index.len());
    println!("Pages processed:     {}", stats.pages());
    println!("Pages skipped:       {}", stats.skipped());
    println!("Redirects skipped:   {}", stats.redirects());
    println!("Excluded by ns:      {}", stats.excluded());
    println!("Excluded by author:  {}", stats.excluded_contributors());
    println!("Title collisions:    {}", stats.collisions());
    println!("Passages indexed:    {}", store.len());
    println!("Oversize passages:   {}", stats.oversize());
    println!(
        "Index dimension:     {}",
        store.dimension().map(|d| d.to_string()).unwrap_or_else(|| "-".into())
    );

    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    let (metadata, store) = cache::load_store(&cache::store_cache_path(&args.output))?;
    let embedder = embed::from_config(&metadata.embedder)?;

    let query_vec = embedder.embed_query(&args.query)?;
    let results = store.search(&query_vec, args.top_k, args.score_threshold)?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results:", results.len());
    for (rank, (record, score)) in results.iter().enumerate() {
        println!();
        println!("{}", "=".repeat(60));
        println!("Result {} (score {:.4})", rank + 1, score);
        println!("{}", "=".repeat(60));
        println!("Title: {}", record.title);
        println!("URL:   {}", record.url);
        println!("Chunk: {} [{}..{}]", record.seq, record.start, record.end);
        println!();

        let preview: String = record.content.chars().take(500).collect();
        if preview.len() < record.content.len() {
            println!("{}...", preview);
        } else {
            println!("{}", preview);
        }
    }

    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let (metadata, store) = cache::load_store(&cache::store_cache_path(&args.output))?;
    let export_dir = args
        .export_dir
        .unwrap_or_else(|| args.output.join("export"));

    let manifest = export_partitioned(&store, &metadata.site, args.passages_per_part, &export_dir)?;

    println!("Export written to: {}", export_dir.display());
    println!("Parts:             {}", manifest.part_count);
    println!("Passages:          {}", manifest.total_passages);
    println!("Dimension:         {}", manifest.embedding_dimension);
    println!("Payload bytes:     {}", manifest.total_bytes);

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

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Search(args) => run_search(args),
        Commands::Export(args) => run_export(args),
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
