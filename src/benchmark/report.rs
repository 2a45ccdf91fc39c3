//! Terminal tables and the JSON results file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::HarnessConfig;

use super::driver::BenchmarkRun;

const METHOD_WIDTH: usize = 12;

/// Contents of the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsFile {
    /// RFC 3339
    pub timestamp: String,
    pub config: HarnessConfig,
    pub run: BenchmarkRun,
}

impl ResultsFile {
    pub fn new(config: &HarnessConfig, run: BenchmarkRun) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            config: config.clone(),
            run,
        }
    }
}

fn fit(name: &str) -> &str {
    match name.char_indices().nth(METHOD_WIDTH) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    }
}

pub fn print_summary(run: &BenchmarkRun) {
    let summary = &run.summary;

    println!("\n╔══════════════════════════════════════════════════════════════════════════╗");
    println!("║                      VECTOR SEARCH BENCHMARK                             ║");
    println!("╚══════════════════════════════════════════════════════════════════════════╝\n");

    println!("┌─ INGESTION ──────────────────────────────────────────────────────────────┐");
    println!("  {}", run.ingest.format_summary());
    println!(
        "  Queries: {} | Searches: {} | Failed: {}",
        run.query_count, summary.measurement_count, summary.failed_count
    );

    println!("\n┌─ LATENCY BY METHOD (ms) ─────────────────────────────────────────────────┐");
    println!(
        "{:12} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>7}",
        "Method", "top_k", "Total", "±", "Min", "Max", "Search", "Results", "Failed"
    );
    println!("{}", "─".repeat(90));
    for m in summary.by_method.iter().chain(&summary.by_method_top_k) {
        let top_k = m.top_k.map(|k| k.to_string()).unwrap_or_else(|| "all".to_string());
        println!(
            "{:12} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>8.1} {:>7}",
            fit(m.method.name()),
            top_k,
            m.total_time.mean,
            m.total_time.std_dev,
            m.total_time.min,
            m.total_time.max,
            m.search_time.mean,
            m.mean_result_count,
            m.failed_count,
        );
    }

    if !summary.overlaps.is_empty() {
        println!("\n┌─ RESULT OVERLAP ─────────────────────────────────────────────────────────┐");
        println!(
            "{:>6} {:12} {:12} {:>12} {:>8} {:>13}",
            "top_k", "Method A", "Method B", "Mean overlap", "Pairs", "Failed pairs"
        );
        println!("{}", "─".repeat(68));
        for o in &summary.overlaps {
            println!(
                "{:>6} {:12} {:12} {:>12.2} {:>8} {:>13}",
                o.top_k,
                fit(o.method_a.name()),
                fit(o.method_b.name()),
                o.mean_overlap,
                o.pair_count,
                o.failed_pairs,
            );
        }
    }

    if !summary.recall.is_empty() {
        println!("\n┌─ RECALL VS BASELINE ─────────────────────────────────────────────────────┐");
        println!(
            "{:12} {:12} {:>6} {:>8} {:>8} {:>13}",
            "Method", "Baseline", "top_k", "Recall", "Pairs", "Failed pairs"
        );
        println!("{}", "─".repeat(64));
        for r in &summary.recall {
            let top_k = r.top_k.map(|k| k.to_string()).unwrap_or_else(|| "all".to_string());
            println!(
                "{:12} {:12} {:>6} {:>8} {:>8} {:>13}",
                fit(r.method.name()),
                fit(r.baseline.name()),
                top_k,
                percent(r.recall),
                r.pair_count,
                r.failed_pairs,
            );
        }
    }

    if summary.failed_count > 0 {
        println!(
            "\n  ⚠ {} searches failed; they count as zero results in overlap and recall",
            summary.failed_count
        );
    }
}

/// Write the results file as pretty JSON, creating parent directories
pub fn write_results(path: &Path, results: &ResultsFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, &json).with_context(|| format!("Failed to write results to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::driver::{BenchmarkPlan, IngestReport, RunPhase};
    use crate::benchmark::metrics::BenchmarkSummary;
    use crate::config::SearchMethod;

    fn empty_run() -> BenchmarkRun {
        let plan = BenchmarkPlan {
            methods: SearchMethod::well_known(),
            top_k_values: vec![5],
            baseline: SearchMethod::exact(),
        };
        BenchmarkRun {
            phase: RunPhase::Done,
            summary: BenchmarkSummary::aggregate(&[], &plan.methods, &plan.top_k_values, &plan.baseline),
            plan,
            ingest: IngestReport::default(),
            query_count: 0,
            measurements: vec![],
            elapsed_ms: 0.0,
        }
    }

    #[test]
    fn test_fit_truncates_on_char_boundary() {
        assert_eq!(fit("exact"), "exact");
        assert_eq!(fit("a_very_long_method_name"), "a_very_long_");
        assert_eq!(fit("ééééééééééééééé").chars().count(), METHOD_WIDTH);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(Some(0.756)), "75.6%");
        assert_eq!(percent(None), "n/a");
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("run.json");
        let results = ResultsFile::new(&HarnessConfig::default(), empty_run());
        write_results(&path, &results).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
        assert_eq!(value["run"]["phase"], "done");
        assert_eq!(value["config"]["engine"]["dimensions"], 384);
        assert_eq!(value["run"]["summary"]["overlaps"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_print_summary_handles_empty_run() {
        print_summary(&empty_run());
    }
}
