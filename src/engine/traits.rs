//! Engine backend abstraction
//!
//! The driver talks to engines only through [`EngineBackend`], so a run can
//! target the real subprocess client or an in-process double.

use std::path::Path;

use crate::config::SearchMethod;
use crate::corpus::{EmbeddingRecord, QueryRecord};
use crate::error::HarnessError;

use super::client::EngineConfig;
use super::protocol::SearchResponse;

/// Result of a successful `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The engine reported the label as already present and kept the old record
    Duplicate,
}

#[async_trait::async_trait]
pub trait EngineBackend: Send + Sync {
    /// Run-scoped configuration this backend was built with
    fn config(&self) -> &EngineConfig;

    fn storage_path(&self) -> &Path {
        &self.config().storage_path
    }

    /// Confirm the engine is reachable and agrees on dimensionality
    ///
    /// Any error returned here is fatal for the run.
    async fn verify(&self) -> Result<(), HarnessError>;

    async fn add(&self, record: &EmbeddingRecord) -> Result<AddOutcome, HarnessError>;

    async fn search(
        &self,
        query: &QueryRecord,
        top_k: usize,
        method: &SearchMethod,
    ) -> Result<SearchResponse, HarnessError>;

    /// Diagnostic listing of stored records, unparsed
    async fn list(&self) -> Result<String, HarnessError>;
}
