//! Deterministic corpus generation and query partitioning

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::loader::SourceItem;
use super::record::{EmbeddingRecord, Metadata, QueryRecord};
use crate::embedders::Embedder;
use crate::error::DataError;

/// Labeling and preview options for generated records
#[derive(Debug, Clone)]
pub struct CorpusGenerator {
    label_prefix: String,
    preview_chars: usize,
}

impl Default for CorpusGenerator {
    fn default() -> Self {
        Self {
            label_prefix: "doc".to_string(),
            preview_chars: 100,
        }
    }
}

impl CorpusGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label_prefix(mut self, prefix: &str) -> Self {
        self.label_prefix = prefix.to_string();
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Sample `sample_size` items from `source` and embed them
    ///
    /// The sample is a seeded shuffle of source indices, so the same seed
    /// always produces the same corpus in the same order. Labels are
    /// `{prefix}_{i}` in output order.
    pub fn generate(
        &self,
        source: &[SourceItem],
        sample_size: usize,
        seed: u64,
        embedder: &dyn Embedder,
    ) -> Result<Vec<EmbeddingRecord>, DataError> {
        if sample_size > source.len() {
            return Err(DataError::InsufficientSource {
                requested: sample_size,
                available: source.len(),
            });
        }

        let mut indices: Vec<usize> = (0..source.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        indices.truncate(sample_size);

        let texts: Vec<&str> = indices.iter().map(|&i| source[i].text.as_str()).collect();
        let vectors = embedder.embed_batch(&texts);

        let records = indices
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (&src_idx, vector))| {
                let item = &source[src_idx];
                EmbeddingRecord {
                    label: format!("{}_{}", self.label_prefix, i),
                    vector,
                    metadata: Metadata {
                        file_path: item.file_path.clone(),
                        file_name: item.file_name.clone(),
                        chunk_index: item.chunk_index,
                        start_line: item.start_line,
                        end_line: item.start_line + item.line_count() - 1,
                        content_preview: create_preview(&item.text, self.preview_chars),
                    },
                }
            })
            .collect();

        Ok(records)
    }
}

/// Generate a corpus with default labeling (`doc_{i}`, 100-char previews)
pub fn generate_corpus(
    source: &[SourceItem],
    sample_size: usize,
    seed: u64,
    embedder: &dyn Embedder,
) -> Result<Vec<EmbeddingRecord>, DataError> {
    CorpusGenerator::new().generate(source, sample_size, seed, embedder)
}

/// Split a corpus into an ingest set and the last `query_count` records
pub fn partition(
    mut corpus: Vec<EmbeddingRecord>,
    query_count: usize,
) -> Result<(Vec<EmbeddingRecord>, Vec<QueryRecord>), DataError> {
    if query_count >= corpus.len() {
        return Err(DataError::InvalidPartition {
            query_count,
            corpus_len: corpus.len(),
        });
    }
    let queries = corpus.split_off(corpus.len() - query_count);
    Ok((corpus, queries))
}

/// Whitespace-collapsed text cut to `max_len` characters
fn create_preview(content: &str, max_len: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_len {
        format!("{}...", flat.chars().take(max_len).collect::<String>())
    } else {
        flat
    }
}
