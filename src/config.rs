//! Configuration for the benchmark harness
//!
//! Defines the bench.toml schema and the SearchMethod selector.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::error::HarnessError;

/// Search strategy selector passed to the engine
///
/// The engine owns the semantics. The harness only knows the well-known
/// names below; every non-empty selector without whitespace reaches the
/// engine exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchMethod(String);

impl SearchMethod {
    pub const EXACT: &'static str = "exact";
    pub const ANN: &'static str = "ann";
    pub const HYBRID: &'static str = "hybrid";

    pub fn exact() -> Self {
        Self(Self::EXACT.to_string())
    }

    pub fn ann() -> Self {
        Self(Self::ANN.to_string())
    }

    pub fn hybrid() -> Self {
        Self(Self::HYBRID.to_string())
    }

    /// The three strategies every engine is expected to understand
    pub fn well_known() -> Vec<Self> {
        vec![Self::exact(), Self::ann(), Self::hybrid()]
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Parse a selector. Surrounding whitespace is trimmed, nothing else
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn description(&self) -> &'static str {
        match self.0.as_str() {
            Self::EXACT => "Exhaustive scan",
            Self::ANN => "Approximate nearest neighbour",
            Self::HYBRID => "Approximate candidates re-ranked exactly",
            _ => "Engine-defined strategy",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SearchMethod {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid search method `{}`", value))
    }
}

impl From<SearchMethod> for String {
    fn from(method: SearchMethod) -> Self {
        method.0
    }
}

/// First element that appears earlier in `items` as well
pub(crate) fn first_repeat<T: Eq + Hash>(items: &[T]) -> Option<&T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().find(|item| !seen.insert(*item))
}

/// How the structured payload is located in the engine's stdout
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ResponseFraming {
    /// Skip leading diagnostics and decode from the first `{`
    #[default]
    Scan,
    /// Payload sits between two marker lines
    Delimited { begin: String, end: String },
}

/// Whole harness configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub corpus: CorpusSettings,
}

impl HarnessConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read harness config: {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse harness config: {:?}", path))?;
        Ok(config)
    }

    /// Load from default location (./bench.toml) or return defaults
    pub fn load_default() -> Result<Self> {
        let local_path = Path::new("bench.toml");
        if local_path.exists() {
            return Self::load(local_path);
        }
        Ok(Self::default())
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> std::result::Result<(), HarnessError> {
        let engine = &self.engine;
        if engine.dimensions == 0 {
            return Err(HarnessError::configuration("engine.dimensions must be positive"));
        }
        if engine.label_size == 0 {
            return Err(HarnessError::configuration("engine.label_size must be positive"));
        }
        if engine.timeout_secs == 0 {
            return Err(HarnessError::configuration("engine.timeout_secs must be positive"));
        }
        if engine.env_prefix.trim().is_empty() {
            return Err(HarnessError::configuration("engine.env_prefix must not be empty"));
        }
        if let ResponseFraming::Delimited { begin, end } = &engine.framing {
            if begin.trim().is_empty() || end.trim().is_empty() || begin == end {
                return Err(HarnessError::configuration(
                    "delimited framing needs two distinct non-empty markers",
                ));
            }
        }

        let run = &self.run;
        if run.methods.is_empty() {
            return Err(HarnessError::configuration("run.methods must not be empty"));
        }
        if !run.methods.contains(&run.baseline) {
            return Err(HarnessError::configuration(format!(
                "baseline method `{}` is not among run.methods",
                run.baseline
            )));
        }
        if let Some(method) = first_repeat(&run.methods) {
            return Err(HarnessError::configuration(format!(
                "run.methods lists `{}` more than once",
                method
            )));
        }
        if run.top_k_values.is_empty() || run.top_k_values.contains(&0) {
            return Err(HarnessError::configuration(
                "run.top_k_values must be non-empty and positive",
            ));
        }
        if let Some(k) = first_repeat(&run.top_k_values) {
            return Err(HarnessError::configuration(format!(
                "run.top_k_values lists {} more than once",
                k
            )));
        }

        let corpus = &self.corpus;
        if corpus.sample_size == 0 {
            return Err(HarnessError::configuration("corpus.sample_size must be positive"));
        }
        if run.query_count >= corpus.sample_size {
            return Err(HarnessError::configuration(format!(
                "run.query_count ({}) must be smaller than corpus.sample_size ({})",
                run.query_count, corpus.sample_size
            )));
        }
        if corpus.label_prefix.is_empty() {
            return Err(HarnessError::configuration("corpus.label_prefix must not be empty"));
        }
        Ok(())
    }
}

/// Engine process and storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Engine executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Extra arguments placed before the command name
    #[serde(default)]
    pub args: Vec<String>,

    /// Storage location owned by the harness for the duration of a run
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Vector dimensionality
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Maximum label length in bytes
    #[serde(default = "default_label_size")]
    pub label_size: usize,

    /// Maximum serialized metadata size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-invocation wall-clock limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Prefix of the environment variables read by the engine
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    #[serde(default)]
    pub framing: ResponseFraming,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: vec![],
            storage_path: default_storage_path(),
            dimensions: default_dimensions(),
            label_size: default_label_size(),
            chunk_size: default_chunk_size(),
            timeout_secs: default_timeout_secs(),
            env_prefix: default_env_prefix(),
            framing: ResponseFraming::default(),
        }
    }
}

/// Query plan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Search methods, in the order they are issued per query
    #[serde(default = "SearchMethod::well_known")]
    pub methods: Vec<SearchMethod>,

    /// Method whose results count as ground truth for recall
    #[serde(default = "SearchMethod::exact")]
    pub baseline: SearchMethod,

    /// Top-k values, outermost loop of the query plan
    #[serde(default = "default_top_k_values")]
    pub top_k_values: Vec<usize>,

    /// Records held out of ingestion and used as queries
    #[serde(default = "default_query_count")]
    pub query_count: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            methods: SearchMethod::well_known(),
            baseline: SearchMethod::exact(),
            top_k_values: default_top_k_values(),
            query_count: default_query_count(),
        }
    }
}

/// Corpus generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSettings {
    /// Directory to walk or JSONL file of text rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Lines per source window when walking a directory
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    /// Window overlap ratio (0.0 to 0.5)
    #[serde(default)]
    pub overlap: f32,

    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,

    /// Field holding the text in JSONL sources
    #[serde(default = "default_text_field")]
    pub text_field: String,

    /// File extensions to include (empty = built-in list)
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Additional path substrings to skip
    #[serde(default)]
    pub skip_patterns: Vec<String>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            source: None,
            sample_size: default_sample_size(),
            seed: default_seed(),
            preview_chars: default_preview_chars(),
            label_prefix: default_label_prefix(),
            chunk_lines: default_chunk_lines(),
            overlap: 0.0,
            min_chunk_chars: default_min_chunk_chars(),
            text_field: default_text_field(),
            extensions: vec![],
            skip_patterns: vec![],
        }
    }
}

fn default_binary() -> PathBuf { PathBuf::from("./target/release/vekta") }
fn default_storage_path() -> PathBuf { PathBuf::from("bench_db") }
fn default_dimensions() -> usize { 384 }
fn default_label_size() -> usize { 32 }
fn default_chunk_size() -> usize { 4096 }
fn default_timeout_secs() -> u64 { 30 }
fn default_env_prefix() -> String { "VEKTA".to_string() }
fn default_top_k_values() -> Vec<usize> { vec![5, 10] }
fn default_query_count() -> usize { 10 }
fn default_sample_size() -> usize { 1000 }
fn default_seed() -> u64 { 42 }
fn default_preview_chars() -> usize { 100 }
fn default_label_prefix() -> String { "doc".to_string() }
fn default_chunk_lines() -> usize { 40 }
fn default_min_chunk_chars() -> usize { 20 }
fn default_text_field() -> String { "text".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_method_parse() {
        assert_eq!(SearchMethod::parse("exact"), Some(SearchMethod::exact()));
        assert_eq!(SearchMethod::parse(" ann "), Some(SearchMethod::ann()));
        assert_eq!(SearchMethod::parse("flat").map(|m| m.name().to_string()), Some("flat".into()));
        assert_eq!(SearchMethod::parse("approx").map(|m| m.name().to_string()), Some("approx".into()));
        assert_eq!(SearchMethod::parse("ANN").map(|m| m.name().to_string()), Some("ANN".into()));
        assert_ne!(SearchMethod::parse("ANN"), Some(SearchMethod::ann()));
        assert_eq!(SearchMethod::parse("flat").unwrap().description(), "Engine-defined strategy");
        assert_eq!(SearchMethod::parse("ivf_pq").map(|m| m.name().to_string()), Some("ivf_pq".into()));
        assert_eq!(SearchMethod::parse(""), None);
        assert_eq!(SearchMethod::parse("two words"), None);
    }

    #[test]
    fn test_harness_config_default_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.dimensions, 384);
        assert_eq!(config.run.methods.len(), 3);
        assert_eq!(config.run.baseline, SearchMethod::exact());
    }

    #[test]
    fn test_harness_config_toml() {
        let toml_str = r#"
[engine]
binary = "/opt/vekta/bin/vekta"
storage_path = "/tmp/vekta_bench"
dimensions = 768
timeout_secs = 5
framing = { mode = "delimited", begin = "<<<", end = ">>>" }

[run]
methods = ["exact", "ann"]
top_k_values = [1, 5]
query_count = 4

[corpus]
sample_size = 50
seed = 7
"#;
        let config: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.dimensions, 768);
        assert_eq!(config.engine.label_size, 32);
        assert_eq!(
            config.engine.framing,
            ResponseFraming::Delimited { begin: "<<<".into(), end: ">>>".into() }
        );
        assert_eq!(config.run.methods, vec![SearchMethod::exact(), SearchMethod::ann()]);
        assert_eq!(config.corpus.seed, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_baseline() {
        let mut config = HarnessConfig::default();
        config.run.methods = vec![SearchMethod::ann()];
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("baseline"));
    }

    #[test]
    fn test_validate_rejects_repeated_methods_and_top_k() {
        let mut config = HarnessConfig::default();
        config.run.methods = vec![SearchMethod::exact(), SearchMethod::ann(), SearchMethod::ann()];
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("`ann` more than once"));

        let mut config = HarnessConfig::default();
        config.run.top_k_values = vec![5, 10, 5];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
        assert!(err.to_string().contains("5 more than once"));
    }

    #[test]
    fn test_first_repeat() {
        assert_eq!(first_repeat(&[1, 2, 3]), None);
        assert_eq!(first_repeat(&[1, 2, 1, 2]), Some(&1));
        assert_eq!(first_repeat::<usize>(&[]), None);
    }

    #[test]
    fn test_validate_rejects_query_count_too_large() {
        let mut config = HarnessConfig::default();
        config.corpus.sample_size = 10;
        config.run.query_count = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_method_in_toml_is_rejected() {
        let toml_str = "[run]\nmethods = [\"exact\", \"\"]\n";
        assert!(toml::from_str::<HarnessConfig>(toml_str).is_err());
    }
}
