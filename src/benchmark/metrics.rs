//! Metrics aggregation for benchmark runs
//!
//! Converts per-query measurements into:
//! - timing statistics per method and per (method, top-k)
//! - pairwise result overlap between methods
//! - recall of each approximate method against the baseline
//!
//! Failed measurements never contribute timings. They contribute zero
//! overlap, and their counts are always reported next to the figures they
//! degrade.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use crate::config::SearchMethod;
use crate::engine::SearchResponse;
use crate::error::HarnessError;

// =============================================================================
// PER-QUERY MEASUREMENTS
// =============================================================================

/// One search of one query with one method at one top-k
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMeasurement {
    pub query_index: usize,
    pub query_label: String,
    pub method: SearchMethod,
    pub top_k: usize,
    /// Harness-side wall time around the engine process
    pub total_time_ms: f64,
    /// Engine-reported search time
    pub search_time_ms: f64,
    /// Engine-reported sort time
    pub sort_time_ms: f64,
    pub result_count: usize,
    pub result_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_similarity: Option<f32>,
    /// Set when the search failed; the measurement then has zero results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryMeasurement {
    pub fn from_response(
        query_index: usize,
        query_label: &str,
        method: &SearchMethod,
        top_k: usize,
        response: &SearchResponse,
        wall: Duration,
    ) -> Self {
        Self {
            query_index,
            query_label: query_label.to_string(),
            method: method.clone(),
            top_k,
            total_time_ms: wall.as_secs_f64() * 1000.0,
            search_time_ms: response.timings.search_duration_ms,
            sort_time_ms: response.timings.sort_duration_ms,
            result_count: response.results.len(),
            result_labels: response.results.iter().map(|r| r.label.clone()).collect(),
            top_similarity: response.top_similarity(),
            error: None,
        }
    }

    /// Zero-result measurement carrying the failure
    pub fn failed(
        query_index: usize,
        query_label: &str,
        method: &SearchMethod,
        top_k: usize,
        wall: Duration,
        error: &HarnessError,
    ) -> Self {
        Self {
            query_index,
            query_label: query_label.to_string(),
            method: method.clone(),
            top_k,
            total_time_ms: wall.as_secs_f64() * 1000.0,
            search_time_ms: 0.0,
            sort_time_ms: 0.0,
            result_count: 0,
            result_labels: vec![],
            top_similarity: None,
            error: Some(format!("{}: {}", error.kind(), error)),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// QUALITY FIGURES
// =============================================================================

/// Number of labels present in both result sets
pub fn overlap(a: &[String], b: &[String]) -> usize {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a.intersection(&b).count()
}

/// Σ overlap(approx, exact) / Σ |exact|, clamped to [0, 1]
///
/// Returns `None` when the exact side contributed no labels at all.
pub fn recall_accuracy<'a, I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (&'a [String], &'a [String])>,
{
    let (found, expected) = pairs
        .into_iter()
        .fold((0usize, 0usize), |(found, expected), (approx, exact)| {
            (found + overlap(approx, exact), expected + exact.len())
        });
    if expected == 0 {
        return None;
    }
    Some((found as f64 / expected as f64).clamp(0.0, 1.0))
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// =============================================================================
// TIMING STATISTICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl TimingStats {
    /// All zeros for an empty sample
    pub fn aggregate(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        Self {
            mean,
            std_dev: std_dev(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

// =============================================================================
// SUMMARIES
// =============================================================================

/// Timing and volume figures for one method, optionally at one top-k
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: SearchMethod,
    /// `None` when the summary spans every top-k
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    pub measurement_count: usize,
    pub failed_count: usize,
    pub total_time: TimingStats,
    pub search_time: TimingStats,
    pub sort_time: TimingStats,
    pub mean_result_count: f64,
}

impl MethodSummary {
    pub fn aggregate(method: &SearchMethod, top_k: Option<usize>, measurements: &[&QueryMeasurement]) -> Self {
        let ok: Vec<&QueryMeasurement> = measurements.iter().copied().filter(|m| !m.is_failed()).collect();
        let collect = |f: fn(&QueryMeasurement) -> f64| ok.iter().map(|m| f(m)).collect::<Vec<f64>>();

        // Failed searches count as zero results
        let mean_result_count = if measurements.is_empty() {
            0.0
        } else {
            measurements.iter().map(|m| m.result_count).sum::<usize>() as f64 / measurements.len() as f64
        };

        Self {
            method: method.clone(),
            top_k,
            measurement_count: measurements.len(),
            failed_count: measurements.len() - ok.len(),
            total_time: TimingStats::aggregate(&collect(|m| m.total_time_ms)),
            search_time: TimingStats::aggregate(&collect(|m| m.search_time_ms)),
            sort_time: TimingStats::aggregate(&collect(|m| m.sort_time_ms)),
            mean_result_count,
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Total: {:.2}ms ±{:.2} | Search: {:.2}ms | Sort: {:.2}ms | Results: {:.1} | Failed: {}/{}",
            self.total_time.mean,
            self.total_time.std_dev,
            self.search_time.mean,
            self.sort_time.mean,
            self.mean_result_count,
            self.failed_count,
            self.measurement_count
        )
    }
}

/// Mean result overlap between two methods at one top-k
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapSummary {
    pub top_k: usize,
    pub method_a: SearchMethod,
    pub method_b: SearchMethod,
    pub mean_overlap: f64,
    pub pair_count: usize,
    /// Pairs where either side failed (counted as zero overlap)
    pub failed_pairs: usize,
}

/// Recall of one method against the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallSummary {
    pub method: SearchMethod,
    pub baseline: SearchMethod,
    /// `None` when the figure spans every top-k
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// `None` when the baseline returned nothing to compare against
    pub recall: Option<f64>,
    pub pair_count: usize,
    pub failed_pairs: usize,
}

/// Everything the report renders
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub measurement_count: usize,
    pub failed_count: usize,
    pub by_method: Vec<MethodSummary>,
    pub by_method_top_k: Vec<MethodSummary>,
    pub overlaps: Vec<OverlapSummary>,
    pub recall: Vec<RecallSummary>,
}

type PairKey<'a> = (usize, usize, &'a SearchMethod);

impl BenchmarkSummary {
    pub fn aggregate(
        measurements: &[QueryMeasurement],
        methods: &[SearchMethod],
        top_k_values: &[usize],
        baseline: &SearchMethod,
    ) -> Self {
        let failed_count = measurements.iter().filter(|m| m.is_failed()).count();

        let by_method = methods
            .iter()
            .map(|method| {
                let selected: Vec<&QueryMeasurement> =
                    measurements.iter().filter(|m| &m.method == method).collect();
                MethodSummary::aggregate(method, None, &selected)
            })
            .collect();

        let by_method_top_k = top_k_values
            .iter()
            .flat_map(|&top_k| {
                methods.iter().map(move |method| {
                    let selected: Vec<&QueryMeasurement> = measurements
                        .iter()
                        .filter(|m| &m.method == method && m.top_k == top_k)
                        .collect();
                    MethodSummary::aggregate(method, Some(top_k), &selected)
                })
            })
            .collect();

        let index: HashMap<PairKey, &QueryMeasurement> = measurements
            .iter()
            .map(|m| ((m.top_k, m.query_index, &m.method), m))
            .collect();
        let queries_at = |top_k: usize| -> BTreeSet<usize> {
            measurements
                .iter()
                .filter(|m| m.top_k == top_k)
                .map(|m| m.query_index)
                .collect()
        };
        // Both sides of a comparison for every query measured at `top_k`
        let pairs_at = |top_k: usize, a: &SearchMethod, b: &SearchMethod| {
            queries_at(top_k)
                .into_iter()
                .filter_map(|q| Some((*index.get(&(top_k, q, a))?, *index.get(&(top_k, q, b))?)))
                .collect::<Vec<_>>()
        };

        let mut overlaps = Vec::new();
        for &top_k in top_k_values {
            for (i, a) in methods.iter().enumerate() {
                for b in &methods[i + 1..] {
                    let pairs = pairs_at(top_k, a, b);
                    let total: usize = pairs
                        .iter()
                        .map(|(x, y)| overlap(&x.result_labels, &y.result_labels))
                        .sum();
                    overlaps.push(OverlapSummary {
                        top_k,
                        method_a: a.clone(),
                        method_b: b.clone(),
                        mean_overlap: if pairs.is_empty() { 0.0 } else { total as f64 / pairs.len() as f64 },
                        pair_count: pairs.len(),
                        failed_pairs: pairs.iter().filter(|(x, y)| x.is_failed() || y.is_failed()).count(),
                    });
                }
            }
        }

        let mut recall = Vec::new();
        for method in methods.iter().filter(|m| *m != baseline) {
            let mut all_pairs = Vec::new();
            for &top_k in top_k_values {
                let pairs = pairs_at(top_k, method, baseline);
                recall.push(recall_summary(method, baseline, Some(top_k), &pairs));
                all_pairs.extend(pairs);
            }
            recall.push(recall_summary(method, baseline, None, &all_pairs));
        }

        Self {
            measurement_count: measurements.len(),
            failed_count,
            by_method,
            by_method_top_k,
            overlaps,
            recall,
        }
    }

    /// Overall recall of `method`, if it was computed
    pub fn overall_recall(&self, method: &SearchMethod) -> Option<f64> {
        self.recall
            .iter()
            .find(|r| &r.method == method && r.top_k.is_none())
            .and_then(|r| r.recall)
    }
}

fn recall_summary(
    method: &SearchMethod,
    baseline: &SearchMethod,
    top_k: Option<usize>,
    pairs: &[(&QueryMeasurement, &QueryMeasurement)],
) -> RecallSummary {
    RecallSummary {
        method: method.clone(),
        baseline: baseline.clone(),
        top_k,
        recall: recall_accuracy(
            pairs
                .iter()
                .map(|(approx, exact)| (approx.result_labels.as_slice(), exact.result_labels.as_slice())),
        ),
        pair_count: pairs.len(),
        failed_pairs: pairs.iter().filter(|(a, e)| a.is_failed() || e.is_failed()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn measurement(query_index: usize, method: SearchMethod, top_k: usize, hits: &[&str], ms: f64) -> QueryMeasurement {
        QueryMeasurement {
            query_index,
            query_label: format!("doc_{}", 100 + query_index),
            method,
            top_k,
            total_time_ms: ms,
            search_time_ms: ms / 2.0,
            sort_time_ms: ms / 10.0,
            result_count: hits.len(),
            result_labels: labels(hits),
            top_similarity: if hits.is_empty() { None } else { Some(0.9) },
            error: None,
        }
    }

    fn failed(query_index: usize, method: SearchMethod, top_k: usize) -> QueryMeasurement {
        QueryMeasurement::failed(
            query_index,
            &format!("doc_{}", 100 + query_index),
            &method,
            top_k,
            Duration::from_millis(30),
            &HarnessError::response_parse("no JSON object in output", "Debug: hi"),
        )
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let a = labels(&["doc_1", "doc_2", "doc_3"]);
        let b = labels(&["doc_3", "doc_9", "doc_1"]);
        assert_eq!(overlap(&a, &b), 2);
        assert_eq!(overlap(&b, &a), 2);
        assert_eq!(overlap(&a, &a), 3);
        assert_eq!(overlap(&a, &[]), 0);
    }

    #[test]
    fn test_recall_accuracy() {
        let exact = labels(&["a", "b", "c", "d"]);
        let approx = labels(&["a", "b", "x", "y"]);
        let recall = recall_accuracy([(approx.as_slice(), exact.as_slice())]).unwrap();
        assert!((recall - 0.5).abs() < 1e-9);

        let empty: Vec<String> = vec![];
        assert_eq!(recall_accuracy([(approx.as_slice(), empty.as_slice())]), None);
        assert_eq!(recall_accuracy(std::iter::empty::<(&[String], &[String])>()), None);
    }

    #[test]
    fn test_recall_is_clamped_with_duplicated_labels() {
        // An engine returning the same label twice must not push recall past 1
        let exact = labels(&["a"]);
        let approx = labels(&["a", "a"]);
        let recall = recall_accuracy([(approx.as_slice(), exact.as_slice())]).unwrap();
        assert!(recall <= 1.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_timing_stats() {
        let stats = TimingStats::aggregate(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.std_dev - 2.0).abs() < 1e-9);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(TimingStats::aggregate(&[]), TimingStats::default());
    }

    #[test]
    fn test_summary_clean_run() {
        let exact = SearchMethod::exact();
        let ann = SearchMethod::ann();
        let measurements = vec![
            measurement(0, exact.clone(), 2, &["a", "b"], 10.0),
            measurement(0, ann.clone(), 2, &["a", "c"], 4.0),
            measurement(1, exact.clone(), 2, &["d", "e"], 12.0),
            measurement(1, ann.clone(), 2, &["d", "e"], 6.0),
        ];
        let methods = vec![exact.clone(), ann.clone()];
        let summary = BenchmarkSummary::aggregate(&measurements, &methods, &[2], &exact);

        assert_eq!(summary.measurement_count, 4);
        assert_eq!(summary.failed_count, 0);
        assert_eq!(summary.by_method.len(), 2);
        assert!((summary.by_method[0].total_time.mean - 11.0).abs() < 1e-9);
        assert_eq!(summary.by_method_top_k.len(), 2);

        assert_eq!(summary.overlaps.len(), 1);
        assert!((summary.overlaps[0].mean_overlap - 1.5).abs() < 1e-9);
        assert_eq!(summary.overlaps[0].pair_count, 2);

        // one per top-k plus the overall figure
        assert_eq!(summary.recall.len(), 2);
        let recall = summary.overall_recall(&ann).unwrap();
        assert!((recall - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_summary_partial_failures() {
        let exact = SearchMethod::exact();
        let ann = SearchMethod::ann();
        let measurements = vec![
            measurement(0, exact.clone(), 2, &["a", "b"], 10.0),
            failed(0, ann.clone(), 2),
            measurement(1, exact.clone(), 2, &["d", "e"], 12.0),
            measurement(1, ann.clone(), 2, &["d", "e"], 6.0),
        ];
        let methods = vec![exact.clone(), ann.clone()];
        let summary = BenchmarkSummary::aggregate(&measurements, &methods, &[2], &exact);

        assert_eq!(summary.failed_count, 1);
        let ann_summary = &summary.by_method[1];
        assert_eq!(ann_summary.failed_count, 1);
        assert_eq!(ann_summary.measurement_count, 2);
        // failed measurement contributes no timing
        assert!((ann_summary.total_time.mean - 6.0).abs() < 1e-9);
        // but it does drag the result count down
        assert!((ann_summary.mean_result_count - 1.0).abs() < 1e-9);
        assert!((summary.by_method[0].mean_result_count - 2.0).abs() < 1e-9);

        assert_eq!(summary.overlaps[0].failed_pairs, 1);
        assert!((summary.overlaps[0].mean_overlap - 1.0).abs() < 1e-9);
        // approx failure adds nothing found but the exact labels still count
        let recall = summary.overall_recall(&ann).unwrap();
        assert!((recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_failed_baseline_shrinks_denominator() {
        let exact = SearchMethod::exact();
        let ann = SearchMethod::ann();
        let measurements = vec![failed(0, exact.clone(), 3), measurement(0, ann.clone(), 3, &["a"], 1.0)];
        let summary =
            BenchmarkSummary::aggregate(&measurements, &[exact.clone(), ann.clone()], &[3], &exact);
        assert_eq!(summary.overall_recall(&ann), None);
        assert_eq!(summary.recall[0].failed_pairs, 1);
    }

    #[test]
    fn test_empty_run_summary() {
        let summary = BenchmarkSummary::aggregate(&[], &SearchMethod::well_known(), &[5], &SearchMethod::exact());
        assert_eq!(summary.measurement_count, 0);
        assert_eq!(summary.by_method[0].total_time, TimingStats::default());
        assert_eq!(summary.overlaps.len(), 3);
        assert!(summary.recall.iter().all(|r| r.recall.is_none()));
    }
}
