//! Flat-file stand-in for a vector search engine
//!
//! Speaks the same protocol the harness drives: one process per command,
//! configuration in `VEKTA_*` environment variables, one JSON record on
//! stdin, diagnostics and a JSON payload on stdout.
//!
//! Methods:
//! - `exact`: cosine over every dimension
//! - `ann`: cosine over the first half of the dimensions only
//! - `hybrid`: `ann` candidates re-ranked with exact cosine

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use vekta_bench::benchmark::cosine_similarity;

const ENV_PREFIX: &str = "VEKTA";
const RECORDS_FILE: &str = "records.jsonl";

#[derive(Parser)]
#[command(name = "stub-engine")]
#[command(about = "Minimal flat-file vector search engine for exercising the harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store the record read from stdin
    Add,
    /// Search with the record read from stdin
    Search,
    /// List stored labels
    List,
    /// Print the effective configuration
    PrintConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    label: String,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: serde_json::Value,
}

struct State {
    path: PathBuf,
    dimensions: usize,
    label_size: usize,
    top_k: usize,
    search_method: String,
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

fn env_usize(suffix: &str) -> Result<Option<usize>> {
    env_var(suffix)
        .map(|v| {
            v.parse::<usize>()
                .with_context(|| format!("{}_{} is not a number: {:?}", ENV_PREFIX, suffix, v))
        })
        .transpose()
}

impl State {
    fn from_env() -> Result<Self> {
        let path = env_var("PATH").context("VEKTA_PATH not set")?;
        let dimensions = env_usize("DIMENSIONS")?.context("VEKTA_DIMENSIONS not set")?;
        let label_size = env_usize("LABEL_SIZE")?.context("VEKTA_LABEL_SIZE not set")?;
        if dimensions == 0 {
            bail!("VEKTA_DIMENSIONS must be positive");
        }
        Ok(Self {
            path: PathBuf::from(path),
            dimensions,
            label_size,
            top_k: env_usize("TOP_K")?.unwrap_or(10),
            search_method: env_var("SEARCH_METHOD").unwrap_or_else(|| "exact".to_string()),
        })
    }

    fn records_file(&self) -> PathBuf {
        self.path.join(RECORDS_FILE)
    }

    fn load(&self) -> Result<Vec<StoredRecord>> {
        let file = match std::fs::File::open(self.records_file()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).context("Failed to open database"),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line).context("Corrupt database record")?);
            }
        }
        Ok(records)
    }
}

fn read_input(state: &State) -> Result<StoredRecord> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let record: StoredRecord =
        serde_json::from_str(input.trim()).context("Failed to parse input as a record")?;
    if record.vector.len() != state.dimensions {
        bail!(
            "Vector has {} dimensions, expected {}",
            record.vector.len(),
            state.dimensions
        );
    }
    Ok(record)
}

fn add(state: &State) -> Result<()> {
    let record = read_input(state)?;
    if record.label.len() > state.label_size {
        bail!("Label '{}' exceeds {} bytes", record.label, state.label_size);
    }
    if state.load()?.iter().any(|r| r.label == record.label) {
        eprintln!(
            "Warning: Label '{}' already exists in the database. Skipping.",
            record.label
        );
        return Ok(());
    }

    std::fs::create_dir_all(&state.path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(state.records_file())?;
    writeln!(file, "{}", serde_json::to_string(&record)?)?;
    println!("Added record '{}'", record.label);
    Ok(())
}

/// Score `records` on the first `dims` components, best first
fn rank<'a>(
    records: impl Iterator<Item = &'a StoredRecord>,
    query: &[f32],
    dims: usize,
) -> Vec<(f32, &'a StoredRecord)> {
    let query = &query[..dims.min(query.len())];
    let mut scored: Vec<(f32, &StoredRecord)> = records
        .filter_map(|r| Some((cosine_similarity(query, r.vector.get(..query.len())?), r)))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.label.cmp(&b.1.label)));
    scored
}

fn search(state: &State) -> Result<()> {
    let total_start = Instant::now();
    let query = read_input(state)?;
    let records = state.load()?;
    println!("Debug: Database opened, record count: {}", records.len());
    println!("Debug: Using search method: {}", state.search_method);

    let half = (state.dimensions / 2).max(1);
    let search_start = Instant::now();
    let mut hits = match state.search_method.as_str() {
        "exact" => rank(records.iter(), &query.vector, state.dimensions),
        "ann" => rank(records.iter(), &query.vector, half),
        "hybrid" => {
            let mut candidates = rank(records.iter(), &query.vector, half);
            candidates.truncate(state.top_k * 2);
            println!("Debug: Re-ranking {} ANN candidates", candidates.len());
            rank(candidates.into_iter().map(|(_, r)| r), &query.vector, state.dimensions)
        }
        other => bail!("Unknown search method: {}", other),
    };
    let search_ms = search_start.elapsed().as_secs_f64() * 1000.0;

    let sort_start = Instant::now();
    hits.truncate(state.top_k);
    let sort_ms = sort_start.elapsed().as_secs_f64() * 1000.0;
    println!("Debug: Search completed. Found {} results", hits.len());

    let output = serde_json::json!({
        "query": {
            "label": query.label,
            "metadata": query.metadata,
        },
        "database_record_count": records.len(),
        "results": hits.iter().map(|(similarity, r)| serde_json::json!({
            "label": r.label,
            "similarity": similarity,
            "metadata": r.metadata,
        })).collect::<Vec<_>>(),
        "actual_results_count": hits.len(),
        "requested_results_count": state.top_k,
        "timings": {
            "search_duration_ms": search_ms,
            "sort_duration_ms": sort_ms,
            "total_duration_ms": total_start.elapsed().as_secs_f64() * 1000.0,
        }
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn list(state: &State) -> Result<()> {
    let records = state.load()?;
    for record in &records {
        println!("{}", record.label);
    }
    println!("Total records: {}", records.len());
    Ok(())
}

fn print_config(state: &State) {
    println!("path={}", state.path.display());
    println!("dimensions={}", state.dimensions);
    println!("label_size={}", state.label_size);
    println!("top_k={}", state.top_k);
    println!("search_method={}", state.search_method);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = State::from_env()?;

    match cli.command {
        Command::Add => add(&state),
        Command::Search => search(&state),
        Command::List => list(&state),
        Command::PrintConfig => {
            print_config(&state);
            Ok(())
        }
    }
}
