//! Benchmark orchestration
//!
//! A run moves through `Init → Configured → Ingested → Querying → Reporting
//! → Done`, or to `Failed` from any step. Engine storage is reset before the
//! run and removed when it ends, whichever way it ends.
//!
//! Invocations are strictly sequential: every engine call is awaited before
//! the next is issued, and all ingestion finishes before the first search.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{first_repeat, RunSettings, SearchMethod};
use crate::corpus::{EmbeddingRecord, QueryRecord};
use crate::engine::{AddOutcome, EngineBackend};
use crate::error::{DataError, HarnessError};

use super::metrics::{BenchmarkSummary, QueryMeasurement};

/// Progress is logged every this many ingested records
const INGEST_LOG_INTERVAL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Init,
    Configured,
    Ingested,
    Querying,
    Reporting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Configured => "configured",
            Self::Ingested => "ingested",
            Self::Querying => "querying",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Which searches to issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    /// Innermost loop, in this order for every query
    pub methods: Vec<SearchMethod>,
    /// Outermost loop
    pub top_k_values: Vec<usize>,
    /// Ground truth for recall
    pub baseline: SearchMethod,
}

impl BenchmarkPlan {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            methods: settings.methods.clone(),
            top_k_values: settings.top_k_values.clone(),
            baseline: settings.baseline.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.methods.is_empty() {
            return Err(HarnessError::configuration("no search methods to benchmark"));
        }
        if let Some(method) = first_repeat(&self.methods) {
            return Err(HarnessError::configuration(format!(
                "search method `{}` is listed more than once",
                method
            )));
        }
        if self.top_k_values.is_empty() || self.top_k_values.contains(&0) {
            return Err(HarnessError::configuration("top-k values must be non-empty and positive"));
        }
        if let Some(k) = first_repeat(&self.top_k_values) {
            return Err(HarnessError::configuration(format!(
                "top-k value {} is listed more than once",
                k
            )));
        }
        if !self.methods.contains(&self.baseline) {
            return Err(HarnessError::configuration(format!(
                "baseline method `{}` is not being benchmarked",
                self.baseline
            )));
        }
        Ok(())
    }

    /// Searches the plan issues for `query_count` queries
    pub fn search_count(&self, query_count: usize) -> usize {
        self.methods.len() * self.top_k_values.len() * query_count
    }
}

/// Outcome of the ingestion phase
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub attempted: usize,
    pub added: usize,
    /// Rejected by the harness or reported as existing by the engine
    pub duplicates: usize,
    /// Failed local validation
    pub rejected: usize,
    /// Engine invocation failed
    pub failed: usize,
    pub elapsed_ms: f64,
}

impl IngestReport {
    pub fn format_summary(&self) -> String {
        format!(
            "Added: {}/{} | Duplicates: {} | Rejected: {} | Failed: {} | {:.1}s",
            self.added,
            self.attempted,
            self.duplicates,
            self.rejected,
            self.failed,
            self.elapsed_ms / 1000.0
        )
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub phase: RunPhase,
    pub plan: BenchmarkPlan,
    pub ingest: IngestReport,
    pub query_count: usize,
    pub measurements: Vec<QueryMeasurement>,
    pub summary: BenchmarkSummary,
    pub elapsed_ms: f64,
}

// =============================================================================
// STORAGE
// =============================================================================

/// Remove a file or directory tree; a missing path is not an error
pub fn remove_storage(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Exclusive claim on the engine's storage for one run
///
/// Claiming wipes whatever a previous run left behind; dropping the guard
/// wipes what this run created.
#[derive(Debug)]
pub struct StorageGuard {
    path: PathBuf,
}

impl StorageGuard {
    pub fn claim(path: &Path) -> Result<Self, HarnessError> {
        remove_storage(path).map_err(|e| {
            HarnessError::configuration(format!("cannot reset storage {:?}: {}", path, e))
        })?;
        tracing::debug!("Claimed engine storage {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageGuard {
    fn drop(&mut self) {
        match remove_storage(&self.path) {
            Ok(()) => tracing::debug!("Removed engine storage {:?}", self.path),
            Err(e) => tracing::warn!("Failed to remove engine storage {:?}: {}", self.path, e),
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

pub struct BenchmarkDriver<'a, E: EngineBackend + ?Sized> {
    engine: &'a E,
    phase: RunPhase,
}

impl<'a, E: EngineBackend + ?Sized> BenchmarkDriver<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::debug!("Run phase {} -> {}", self.phase.name(), next.name());
        self.phase = next;
    }

    /// Ingest `ingest_set`, run every planned search and aggregate
    ///
    /// Only fatal errors (configuration, cancellation) are returned. Per
    /// record and per query failures are logged and counted.
    pub async fn run(
        &mut self,
        ingest_set: &[EmbeddingRecord],
        queries: &[QueryRecord],
        plan: &BenchmarkPlan,
    ) -> Result<BenchmarkRun, HarnessError> {
        let result = self.run_phases(ingest_set, queries, plan).await;
        if let Err(e) = &result {
            tracing::error!("Benchmark run failed during {}: {}", self.phase.name(), e);
            self.transition(RunPhase::Failed);
        }
        result
    }

    async fn run_phases(
        &mut self,
        ingest_set: &[EmbeddingRecord],
        queries: &[QueryRecord],
        plan: &BenchmarkPlan,
    ) -> Result<BenchmarkRun, HarnessError> {
        let start = Instant::now();
        let _storage = StorageGuard::claim(self.engine.storage_path())?;

        plan.validate()?;
        self.engine.verify().await?;
        self.transition(RunPhase::Configured);

        let ingest = self.ingest(ingest_set).await?;
        tracing::info!("Ingestion finished. {}", ingest.format_summary());
        self.transition(RunPhase::Ingested);

        self.transition(RunPhase::Querying);
        let measurements = self.query(queries, plan, &ingest, ingest_set).await?;

        self.transition(RunPhase::Reporting);
        let summary =
            BenchmarkSummary::aggregate(&measurements, &plan.methods, &plan.top_k_values, &plan.baseline);
        if summary.failed_count > 0 {
            tracing::warn!(
                "{} of {} searches failed and are reported as zero-result measurements",
                summary.failed_count,
                summary.measurement_count
            );
        }

        self.transition(RunPhase::Done);
        Ok(BenchmarkRun {
            phase: self.phase,
            plan: plan.clone(),
            ingest,
            query_count: queries.len(),
            measurements,
            summary,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn ingest(&mut self, records: &[EmbeddingRecord]) -> Result<IngestReport, HarnessError> {
        let start = Instant::now();
        let limits = self.engine.config().limits();
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut report = IngestReport::default();

        tracing::info!("Ingesting {} records", records.len());
        for record in records {
            report.attempted += 1;

            if let Err(e) = record.validate(&limits) {
                tracing::warn!("Skipping record: {}", e);
                report.rejected += 1;
                continue;
            }
            if !seen.insert(record.label.as_str()) {
                let e = DataError::DuplicateLabel {
                    label: record.label.clone(),
                };
                tracing::warn!("Skipping record: {}", e);
                report.duplicates += 1;
                continue;
            }

            match self.engine.add(record).await {
                Ok(AddOutcome::Added) => report.added += 1,
                Ok(AddOutcome::Duplicate) => {
                    let e = DataError::DuplicateLabel {
                        label: record.label.clone(),
                    };
                    tracing::warn!("Engine kept the existing record: {}", e);
                    report.duplicates += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(HarnessError::Data(e)) => {
                    tracing::warn!("Skipping record: {}", e);
                    report.rejected += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to add `{}`: {}", record.label, e);
                    report.failed += 1;
                }
            }

            if report.attempted % INGEST_LOG_INTERVAL == 0 {
                tracing::info!("  Ingested {}/{}", report.attempted, records.len());
            }
        }

        if report.added == 0 && !records.is_empty() {
            tracing::warn!("No records were ingested; every search will come back empty");
        }
        report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(report)
    }

    async fn query(
        &mut self,
        queries: &[QueryRecord],
        plan: &BenchmarkPlan,
        ingest: &IngestReport,
        ingest_set: &[EmbeddingRecord],
    ) -> Result<Vec<QueryMeasurement>, HarnessError> {
        let limits = self.engine.config().limits();
        let ingested_labels: HashSet<&str> = ingest_set.iter().map(|r| r.label.as_str()).collect();
        let query_errors: Vec<Option<DataError>> = queries
            .iter()
            .map(|q| {
                if ingested_labels.contains(q.label.as_str()) {
                    tracing::warn!("Query `{}` is also in the ingest set", q.label);
                }
                q.validate(&limits).err()
            })
            .collect();

        let total = plan.search_count(queries.len());
        tracing::info!(
            "Running {} searches ({} queries × {} methods × {} top-k values)",
            total,
            queries.len(),
            plan.methods.len(),
            plan.top_k_values.len()
        );

        let mut measurements = Vec::with_capacity(total);
        for &top_k in &plan.top_k_values {
            tracing::info!("  top_k = {}", top_k);
            for (query_index, query) in queries.iter().enumerate() {
                for method in &plan.methods {
                    if let Some(e) = &query_errors[query_index] {
                        let error = HarnessError::from(e.clone());
                        measurements.push(QueryMeasurement::failed(
                            query_index,
                            &query.label,
                            method,
                            top_k,
                            Duration::ZERO,
                            &error,
                        ));
                        continue;
                    }

                    let start = Instant::now();
                    let outcome = self.engine.search(query, top_k, method).await;
                    let wall = start.elapsed();

                    let measurement = match outcome {
                        Ok(response) => {
                            let bound = top_k.min(ingest.added);
                            if response.actual_results_count > bound {
                                tracing::warn!(
                                    "{} search for `{}` returned {} results, expected at most {}",
                                    method,
                                    query.label,
                                    response.actual_results_count,
                                    bound
                                );
                            }
                            if let Some(count) = response.database_record_count {
                                if count != ingest.added {
                                    tracing::warn!(
                                        "Engine reports {} stored records but {} were ingested",
                                        count,
                                        ingest.added
                                    );
                                }
                            }
                            QueryMeasurement::from_response(
                                query_index,
                                &query.label,
                                method,
                                top_k,
                                &response,
                                wall,
                            )
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!("{} search for `{}` failed: {}", method, query.label, e);
                            QueryMeasurement::failed(query_index, &query.label, method, top_k, wall, &e)
                        }
                    };
                    measurements.push(measurement);
                }
            }
        }

        Ok(measurements)
    }
}
