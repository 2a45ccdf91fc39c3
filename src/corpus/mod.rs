//! Corpus loading, generation and partitioning
//!
//! ```rust,ignore
//! use corpus::{load_source, CorpusGenerator, SourceConfig, partition};
//!
//! let items = load_source(&path, &SourceConfig::new())?;
//! let corpus = CorpusGenerator::new().generate(&items, 1000, 42, &embedder)?;
//! let (ingest, queries) = partition(corpus, 10)?;
//! ```

pub mod generator;
pub mod loader;
pub mod record;

pub use generator::{generate_corpus, partition, CorpusGenerator};
pub use loader::{load_source, load_source_dir, load_source_jsonl, SourceConfig, SourceItem};
pub use record::{
    ensure_unique_labels, read_records, write_records, EmbeddingRecord, Metadata, QueryRecord,
    RecordLimits,
};
