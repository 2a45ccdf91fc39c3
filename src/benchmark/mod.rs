//! Benchmark orchestration, metrics and reporting

pub mod driver;
pub mod metrics;
pub mod report;

pub use driver::{
    remove_storage, BenchmarkDriver, BenchmarkPlan, BenchmarkRun, IngestReport, RunPhase,
    StorageGuard,
};
pub use metrics::{
    cosine_similarity, overlap, recall_accuracy, std_dev, BenchmarkSummary, MethodSummary,
    OverlapSummary, QueryMeasurement, RecallSummary, TimingStats,
};
pub use report::{print_summary, write_results, ResultsFile};
