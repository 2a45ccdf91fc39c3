//! Vector Search Benchmark CLI
//!
//! Drives a vector search engine binary through its add/search protocol and
//! compares search methods by latency, overlap and recall.
//!
//! ## Quick Start
//!
//! ```bash
//! # Build a corpus and a held-out query set from a codebase
//! ./vekta-bench generate --source ./my-codebase --output-dir ./data
//!
//! # Benchmark the engine with those artifacts
//! ./vekta-bench run \
//!     --corpus ./data/corpus.jsonl \
//!     --queries ./data/queries.jsonl \
//!     --engine ./target/release/vekta
//!
//! # Or generate on the fly
//! ./vekta-bench run --source ./my-codebase --methods exact,ann
//! ```
//!
//! ## Configuration
//!
//! Settings are read from `bench.toml` (or `--config`). Command-line flags
//! override the file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use vekta_bench::benchmark::{print_summary, write_results, BenchmarkDriver, BenchmarkPlan, ResultsFile};
use vekta_bench::config::{HarnessConfig, SearchMethod};
use vekta_bench::corpus::{
    ensure_unique_labels, load_source, partition, read_records, write_records, CorpusGenerator,
    EmbeddingRecord, QueryRecord, SourceConfig,
};
use vekta_bench::embedders::{measure_sync, Embedder, SeededEmbedder};
use vekta_bench::engine::{parse_search_output_or_empty, EngineBackend, EngineClient, EngineConfig};

#[derive(Parser)]
#[command(name = "vekta-bench")]
#[command(about = "Benchmark harness for subprocess vector search engines")]
#[command(version)]
struct Cli {
    /// Harness config file (TOML). Defaults to ./bench.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate corpus.jsonl and queries.jsonl from a source
    Generate {
        /// Directory to walk or JSONL file of text rows
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Where to write the artifacts
        #[arg(short, long, default_value = "data")]
        output_dir: PathBuf,

        #[command(flatten)]
        corpus: CorpusArgs,
    },

    /// Ingest a corpus into the engine and benchmark every search method
    ///
    /// Engine storage is wiped before and after the run. Results are saved
    /// to a JSON file.
    Run {
        /// Pre-generated corpus (JSONL). Requires --queries
        #[arg(long, requires = "queries", conflicts_with = "source")]
        corpus_file: Option<PathBuf>,

        /// Pre-generated queries (JSONL)
        #[arg(short, long, requires = "corpus_file")]
        queries: Option<PathBuf>,

        /// Generate the corpus from this source instead
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Output file for results (JSON)
        #[arg(short, long, default_value = "results/bench_results.json")]
        output: PathBuf,

        /// Search methods (comma-separated, e.g., "exact,ann,hybrid")
        #[arg(short, long, value_delimiter = ',')]
        methods: Option<Vec<String>>,

        /// Baseline method for recall
        #[arg(long)]
        baseline: Option<String>,

        /// Top-k values (comma-separated)
        #[arg(short = 'k', long, value_delimiter = ',')]
        top_k: Option<Vec<usize>>,

        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        corpus: CorpusArgs,
    },

    /// Show what the engine has stored
    List {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show the configuration as the engine sees it
    PrintConfig {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Parse captured search output with the configured framing
    ///
    /// Unparseable output prints an empty response.
    ParseOutput {
        /// File holding the engine's stdout. Reads stdin when omitted
        file: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Engine executable
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Engine storage path
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Vector dimensions
    #[arg(short, long)]
    dimensions: Option<usize>,

    /// Per-invocation timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(clap::Args)]
struct CorpusArgs {
    /// Records to sample from the source (queries included)
    #[arg(long)]
    sample_size: Option<usize>,

    /// Records held out as queries
    #[arg(long)]
    query_count: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

impl EngineArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(engine) = &self.engine {
            config.engine.binary = engine.clone();
        }
        if let Some(path) = &self.storage_path {
            config.engine.storage_path = path.clone();
        }
        if let Some(dimensions) = self.dimensions {
            config.engine.dimensions = dimensions;
        }
        if let Some(timeout) = self.timeout_secs {
            config.engine.timeout_secs = timeout;
        }
    }
}

impl CorpusArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(sample_size) = self.sample_size {
            config.corpus.sample_size = sample_size;
        }
        if let Some(query_count) = self.query_count {
            config.run.query_count = query_count;
        }
        if let Some(seed) = self.seed {
            config.corpus.seed = seed;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::load_default()?,
    };

    match cli.command {
        Commands::Generate {
            source,
            output_dir,
            corpus,
        } => {
            corpus.apply(&mut config);
            if let Some(source) = source {
                config.corpus.source = Some(source);
            }
            config.validate()?;
            run_generate(&config, &output_dir)
        }
        Commands::Run {
            corpus_file,
            queries,
            source,
            output,
            methods,
            baseline,
            top_k,
            engine,
            corpus,
        } => {
            engine.apply(&mut config);
            corpus.apply(&mut config);
            if let Some(source) = source {
                config.corpus.source = Some(source);
            }
            if let Some(methods) = methods {
                config.run.methods = parse_methods(&methods)?;
            }
            if let Some(baseline) = baseline {
                config.run.baseline = parse_method(&baseline)?;
            }
            if let Some(top_k) = top_k {
                config.run.top_k_values = top_k;
            }
            config.validate()?;

            let (ingest, queries) = match (corpus_file, queries) {
                (Some(corpus_path), Some(queries_path)) => {
                    (read_records(&corpus_path)?, read_records(&queries_path)?)
                }
                _ => {
                    let corpus = generate(&config)?;
                    partition(corpus, config.run.query_count)?
                }
            };
            run_benchmark(&config, &ingest, &queries, &output).await
        }
        Commands::List { engine } => {
            engine.apply(&mut config);
            let client = EngineClient::new(EngineConfig::from_settings(&config.engine)?);
            let listing = client.list().await?;
            print!("{}", listing);
            Ok(())
        }
        Commands::PrintConfig { engine } => {
            engine.apply(&mut config);
            let client = EngineClient::new(EngineConfig::from_settings(&config.engine)?);
            for (key, value) in client.print_config().await? {
                println!("{}={}", key, value);
            }
            Ok(())
        }
        Commands::ParseOutput { file } => {
            let output = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {:?}", path))?,
                None => std::io::read_to_string(std::io::stdin())
                    .context("Failed to read stdin")?,
            };
            let response = parse_search_output_or_empty(&output, &config.engine.framing);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

fn parse_method(s: &str) -> Result<SearchMethod> {
    SearchMethod::parse(s).with_context(|| format!("Invalid search method: {:?}", s))
}

fn parse_methods(methods: &[String]) -> Result<Vec<SearchMethod>> {
    methods.iter().map(|m| parse_method(m)).collect()
}

/// Load the configured source and build a labeled corpus from it
fn generate(config: &HarnessConfig) -> Result<Vec<EmbeddingRecord>> {
    let Some(source) = &config.corpus.source else {
        bail!("No corpus source: pass --source or set corpus.source in the config");
    };

    eprintln!("Loading source from {:?}...", source);
    let items = load_source(source, &SourceConfig::from_settings(&config.corpus))?;
    eprintln!("  Found {} source items", items.len());

    let embedder = SeededEmbedder::new(config.engine.dimensions, config.corpus.seed);
    let generator = CorpusGenerator::new()
        .with_label_prefix(&config.corpus.label_prefix)
        .with_preview_chars(config.corpus.preview_chars);

    let (corpus, duration) = measure_sync(|| {
        generator.generate(&items, config.corpus.sample_size, config.corpus.seed, &embedder)
    });
    let corpus = corpus?;
    eprintln!(
        "  Embedded {} records with {} in {:.1}s",
        corpus.len(),
        embedder.name(),
        duration.as_secs_f64()
    );
    Ok(corpus)
}

fn run_generate(config: &HarnessConfig, output_dir: &Path) -> Result<()> {
    let corpus = generate(config)?;
    let (ingest, queries) = partition(corpus, config.run.query_count)?;

    let corpus_path = output_dir.join("corpus.jsonl");
    let queries_path = output_dir.join("queries.jsonl");
    write_records(&corpus_path, &ingest)?;
    write_records(&queries_path, &queries)?;

    println!("Wrote {} records to {:?}", ingest.len(), corpus_path);
    println!("Wrote {} queries to {:?}", queries.len(), queries_path);
    Ok(())
}

async fn run_benchmark(
    config: &HarnessConfig,
    ingest: &[EmbeddingRecord],
    queries: &[QueryRecord],
    output: &Path,
) -> Result<()> {
    if let Err(e) = ensure_unique_labels(ingest) {
        tracing::warn!("Corpus contains repeated labels ({}); repeats will be skipped", e);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling the in-flight engine call");
            on_ctrl_c.cancel();
        }
    });

    let client =
        EngineClient::new(EngineConfig::from_settings(&config.engine)?).with_cancellation(cancel);
    let plan = BenchmarkPlan::from_settings(&config.run);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              VECTOR SEARCH BENCHMARK                         ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    println!("Engine: {:?}", client.config().binary);
    println!(
        "Records: {} | Queries: {} | top_k: {:?}",
        ingest.len(),
        queries.len(),
        plan.top_k_values
    );
    for method in &plan.methods {
        let role = if *method == plan.baseline { " [baseline]" } else { "" };
        println!("  {:<12} {}{}", method.name(), method.description(), role);
    }

    let mut driver = BenchmarkDriver::new(&client);
    let run = driver.run(ingest, queries, &plan).await?;

    print_summary(&run);

    let results = ResultsFile::new(config, run);
    write_results(output, &results)?;
    println!("\nResults saved to {:?}", output);

    Ok(())
}
