//! Engine response types and stdout parsing
//!
//! Engines are free to print diagnostics around the structured payload, so
//! the payload has to be located before it can be decoded. See
//! [`ResponseFraming`] for the two supported strategies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResponseFraming;
use crate::error::HarnessError;

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub label: String,
    /// Higher is more similar
    pub similarity: f32,
    /// Echoed by the engine, kept opaque
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Engine-reported timings in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchTimings {
    pub search_duration_ms: f64,
    pub sort_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ordered by descending similarity
    pub results: Vec<SearchResult>,
    pub actual_results_count: usize,
    pub timings: SearchTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_results_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_record_count: Option<usize>,
}

impl SearchResponse {
    /// Zero-result sentinel
    pub fn empty() -> Self {
        Self {
            results: vec![],
            actual_results_count: 0,
            timings: SearchTimings::default(),
            requested_results_count: None,
            database_record_count: None,
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.label.as_str()).collect()
    }

    pub fn top_similarity(&self) -> Option<f32> {
        self.results.first().map(|r| r.similarity)
    }

    fn check(&self, output: &str) -> Result<(), HarnessError> {
        if self.actual_results_count != self.results.len() {
            return Err(HarnessError::response_parse(
                format!(
                    "actual_results_count is {} but {} results were returned",
                    self.actual_results_count,
                    self.results.len()
                ),
                output,
            ));
        }
        let t = &self.timings;
        let timings = [Some(t.search_duration_ms), Some(t.sort_duration_ms), t.total_duration_ms];
        if timings.iter().flatten().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(HarnessError::response_parse("negative or non-finite timing", output));
        }
        Ok(())
    }
}

/// Extract and validate the search payload from raw stdout
pub fn parse_search_output(
    output: &str,
    framing: &ResponseFraming,
) -> Result<SearchResponse, HarnessError> {
    let response = match framing {
        ResponseFraming::Scan => scan_for_response(output)?,
        ResponseFraming::Delimited { begin, end } => {
            let body = delimited_body(output, begin, end)?;
            serde_json::from_str::<SearchResponse>(body).map_err(|e| {
                HarnessError::response_parse(format!("invalid payload between markers: {}", e), output)
            })?
        }
    };
    response.check(output)?;
    Ok(response)
}

/// Like [`parse_search_output`], but malformed output yields zero results
pub fn parse_search_output_or_empty(output: &str, framing: &ResponseFraming) -> SearchResponse {
    match parse_search_output(output, framing) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Treating unparseable search output as empty: {}", e);
            SearchResponse::empty()
        }
    }
}

/// Decode the first JSON object in `output` that has the response shape
///
/// Text before the object (diagnostic lines) and after it is ignored. Each
/// `{` is tried in turn until one decodes.
fn scan_for_response(output: &str) -> Result<SearchResponse, HarnessError> {
    let mut last_error = None;

    for (start, _) in output.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&output[start..]).into_iter::<SearchResponse>();
        match stream.next() {
            Some(Ok(response)) => return Ok(response),
            Some(Err(e)) => {
                last_error.get_or_insert(e);
            }
            None => {}
        }
    }

    let reason = match last_error {
        Some(e) => format!("no decodable response object: {}", e),
        None => "no JSON object in output".to_string(),
    };
    Err(HarnessError::response_parse(reason, output))
}

fn delimited_body<'a>(output: &'a str, begin: &str, end: &str) -> Result<&'a str, HarnessError> {
    let mut offset = 0;
    let mut body_start = None;

    for line in output.split_inclusive('\n') {
        let trimmed = line.trim();
        match body_start {
            None if trimmed == begin => body_start = Some(offset + line.len()),
            Some(start) if trimmed == end => return Ok(&output[start..offset]),
            _ => {}
        }
        offset += line.len();
    }

    let reason = match body_start {
        None => format!("begin marker `{}` not found", begin),
        Some(_) => format!("end marker `{}` not found", end),
    };
    Err(HarnessError::response_parse(reason, output))
}

/// Parse a `key=value` configuration listing, ignoring other lines
pub fn parse_config_listing(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty() && !k.contains(char::is_whitespace))
        .collect()
}
