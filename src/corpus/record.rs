//! Embedding records and their JSONL artifacts

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::DataError;

/// Descriptive metadata carried with every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub file_path: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub content_preview: String,
}

/// A uniquely labeled vector plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub label: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// Records held out of ingestion and used as search input
pub type QueryRecord = EmbeddingRecord;

/// Size limits a record must satisfy before it is sent to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLimits {
    pub dimensions: usize,
    pub label_size: usize,
    /// Maximum serialized metadata size in bytes
    pub chunk_size: usize,
}

impl EmbeddingRecord {
    /// Check the record against the engine's configured limits
    pub fn validate(&self, limits: &RecordLimits) -> Result<(), DataError> {
        if self.vector.len() != limits.dimensions {
            return Err(DataError::DimensionMismatch {
                label: self.label.clone(),
                expected: limits.dimensions,
                actual: self.vector.len(),
            });
        }
        if let Some(index) = self.vector.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteComponent {
                label: self.label.clone(),
                index,
            });
        }
        if self.label.len() > limits.label_size {
            return Err(DataError::LabelTooLong {
                label: self.label.clone(),
                actual: self.label.len(),
                limit: limits.label_size,
            });
        }
        let metadata_size = self.metadata_size();
        if metadata_size > limits.chunk_size {
            return Err(DataError::MetadataTooLarge {
                label: self.label.clone(),
                actual: metadata_size,
                limit: limits.chunk_size,
            });
        }
        Ok(())
    }

    /// Serialized size of the metadata object in bytes
    pub fn metadata_size(&self) -> usize {
        serde_json::to_vec(&self.metadata).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Single-line JSON payload as written to the engine's stdin
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fail on the first label that appears twice
pub fn ensure_unique_labels(records: &[EmbeddingRecord]) -> Result<(), DataError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.label.as_str()) {
            return Err(DataError::DuplicateLabel {
                label: record.label.clone(),
            });
        }
    }
    Ok(())
}

/// Write records as JSONL, one record per line
pub fn write_records(path: &Path, records: &[EmbeddingRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)
            .with_context(|| format!("Failed to serialize record '{}'", record.label))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a JSONL record file, skipping blank lines
pub fn read_records(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {} of {:?}", i + 1, path))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EmbeddingRecord = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse line {} of {:?}", i + 1, path))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
pub(crate) fn test_record(label: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        label: label.to_string(),
        vector,
        metadata: Metadata {
            file_path: format!("src/{}.rs", label),
            file_name: format!("{}.rs", label),
            chunk_index: 0,
            start_line: 1,
            end_line: 1,
            content_preview: format!("preview of {}", label),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RecordLimits {
        RecordLimits {
            dimensions: 3,
            label_size: 8,
            chunk_size: 1024,
        }
    }

    #[test]
    fn test_validate_accepts_conforming_record() {
        let record = test_record("doc_0", vec![0.1, 0.2, 0.3]);
        assert!(record.validate(&limits()).is_ok());
    }

    #[test]
    fn test_validate_dimension_mismatch() {
        let record = test_record("doc_0", vec![0.1, 0.2]);
        assert_eq!(
            record.validate(&limits()),
            Err(DataError::DimensionMismatch {
                label: "doc_0".into(),
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_validate_non_finite() {
        let record = test_record("doc_0", vec![0.1, f32::NAN, 0.3]);
        assert!(matches!(
            record.validate(&limits()),
            Err(DataError::NonFiniteComponent { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_label_and_metadata_limits() {
        let record = test_record("a_very_long_label", vec![0.0; 3]);
        assert!(matches!(
            record.validate(&limits()),
            Err(DataError::LabelTooLong { limit: 8, .. })
        ));

        let mut record = test_record("doc_1", vec![0.0; 3]);
        record.metadata.content_preview = "x".repeat(2048);
        assert!(matches!(
            record.validate(&limits()),
            Err(DataError::MetadataTooLarge { limit: 1024, .. })
        ));
    }

    #[test]
    fn test_ensure_unique_labels() {
        let records = vec![
            test_record("doc_0", vec![0.0; 3]),
            test_record("doc_1", vec![0.0; 3]),
        ];
        assert!(ensure_unique_labels(&records).is_ok());

        let mut dup = records.clone();
        dup.push(test_record("doc_0", vec![1.0; 3]));
        assert_eq!(
            ensure_unique_labels(&dup),
            Err(DataError::DuplicateLabel { label: "doc_0".into() })
        );
    }

    #[test]
    fn test_jsonl_files_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("corpus.jsonl");
        let records = vec![
            test_record("doc_0", vec![0.5, -0.5, 0.0]),
            test_record("doc_1", vec![1.0, 0.0, 0.0]),
        ];
        write_records(&path, &records).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let loaded = read_records(&path).unwrap();
        assert_eq!(loaded, records);
    }
}
