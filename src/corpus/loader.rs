//! Source loading for corpus generation
//!
//! A source is either a directory tree (split into line windows) or a JSONL
//! file of text rows.
//!
//! ```rust,ignore
//! let config = SourceConfig::new()
//!     .with_extensions(vec!["rs", "md"])
//!     .with_chunk_lines(40);
//!
//! let items = load_source(&path, &config)?;
//! ```

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::CorpusSettings;

/// One unit of descriptive text before embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Source file path (relative to the walked root)
    pub file_path: String,
    pub file_name: String,
    /// Position of this window within its file
    pub chunk_index: usize,
    /// 1-indexed first line of the window
    pub start_line: usize,
    pub text: String,
}

impl SourceItem {
    /// Number of lines covered by the text (at least one)
    pub fn line_count(&self) -> usize {
        self.text.lines().count().max(1)
    }
}

/// Configuration for source loading
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// File extensions to include (without dots). Empty means the built-in list
    pub extensions: Vec<String>,

    /// Extensions included when `extensions` is empty
    pub default_extensions: HashSet<String>,

    /// Lines per window
    pub chunk_lines: usize,

    /// Overlap ratio (0.0 to 0.5) between consecutive windows
    pub overlap: f32,

    /// Minimum characters for a window to be kept
    pub min_chunk_chars: usize,

    /// Patterns to skip (substrings in path)
    pub skip_patterns: Vec<String>,

    /// Field holding the text in JSONL rows
    pub text_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            extensions: vec![],
            default_extensions: [
                "rs", "py", "ts", "js", "go", "java", "c", "cpp", "h", "rb", "md", "rst", "txt",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            chunk_lines: 40,
            overlap: 0.0,
            min_chunk_chars: 20,
            skip_patterns: vec![
                "/target/".to_string(),
                "/node_modules/".to_string(),
                "/.git/".to_string(),
                "/__pycache__/".to_string(),
                "/.venv/".to_string(),
                "/dist/".to_string(),
                "/build/".to_string(),
            ],
            text_field: "text".to_string(),
        }
    }
}

impl SourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[corpus]` section of the harness config
    pub fn from_settings(settings: &CorpusSettings) -> Self {
        let mut config = Self::new()
            .with_chunk_lines(settings.chunk_lines)
            .with_overlap(settings.overlap)
            .with_min_chunk_chars(settings.min_chunk_chars)
            .with_text_field(&settings.text_field)
            .with_skip_patterns(settings.skip_patterns.iter().map(String::as_str).collect());
        if !settings.extensions.is_empty() {
            config = config.with_extensions(settings.extensions.iter().map(String::as_str).collect());
        }
        config
    }

    pub fn with_extensions(mut self, extensions: Vec<&str>) -> Self {
        self.extensions = extensions.into_iter().map(String::from).collect();
        self
    }

    pub fn with_chunk_lines(mut self, lines: usize) -> Self {
        self.chunk_lines = lines.max(1);
        self
    }

    /// Set overlap ratio (clamped to 0.0..=0.5)
    pub fn with_overlap(mut self, overlap: f32) -> Self {
        self.overlap = overlap.clamp(0.0, 0.5);
        self
    }

    pub fn with_min_chunk_chars(mut self, min_chars: usize) -> Self {
        self.min_chunk_chars = min_chars;
        self
    }

    pub fn with_text_field(mut self, field: &str) -> Self {
        self.text_field = field.to_string();
        self
    }

    /// Add skip patterns
    pub fn with_skip_patterns(mut self, patterns: Vec<&str>) -> Self {
        self.skip_patterns.extend(patterns.into_iter().map(String::from));
        self
    }

    pub fn should_include(&self, ext: &str) -> bool {
        if self.extensions.is_empty() {
            self.default_extensions.contains(ext)
        } else {
            self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        }
    }

    pub fn should_skip(&self, path_str: &str) -> bool {
        self.skip_patterns.iter().any(|pattern| path_str.contains(pattern))
    }
}

/// Load a directory tree or a JSONL file, depending on what `path` is
pub fn load_source(path: &Path, config: &SourceConfig) -> Result<Vec<SourceItem>> {
    if path.is_dir() {
        load_source_dir(path, config)
    } else {
        load_source_jsonl(path, config)
    }
}

/// Walk a directory (respecting .gitignore) and split files into line windows
pub fn load_source_dir(root_path: &Path, config: &SourceConfig) -> Result<Vec<SourceItem>> {
    let mut items = Vec::new();
    let mut file_count = 0;

    let walker = WalkBuilder::new(root_path)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip patterns match against the path below the root only
        let relative = path.strip_prefix(root_path).unwrap_or(path);
        let path_str = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
        if config.should_skip(&path_str) {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !config.should_include(ext) {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => continue, // binary or unreadable
        };

        items.extend(split_into_windows(relative, &content, config));
        file_count += 1;
    }

    tracing::debug!(
        "Loaded {} source windows from {} files under {:?}",
        items.len(),
        file_count,
        root_path
    );
    Ok(items)
}

/// Line-window splitting with optional overlap
fn split_into_windows(file_path: &Path, content: &str, config: &SourceConfig) -> Vec<SourceItem> {
    let file_path_str = file_path.to_string_lossy().replace('\\', "/");
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path_str.clone());
    let lines: Vec<&str> = content.lines().collect();

    let max_lines = config.chunk_lines.max(1);
    let overlap_lines = ((max_lines as f32 * config.overlap) as usize).min(max_lines - 1);
    let step = max_lines - overlap_lines;

    let mut items = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let end = (start + max_lines).min(lines.len());
        let text = lines[start..end].join("\n");

        if text.trim().len() >= config.min_chunk_chars {
            items.push(SourceItem {
                file_path: file_path_str.clone(),
                file_name: file_name.clone(),
                chunk_index: items.len(),
                start_line: start + 1,
                text,
            });
        }

        if end == lines.len() {
            break;
        }
        start += step;
    }

    items
}

/// Read text rows from a JSONL file
///
/// Each row must be an object with a string field named by `text_field`.
pub fn load_source_jsonl(path: &Path, config: &SourceConfig) -> Result<Vec<SourceItem>> {
    let file = File::open(path).with_context(|| format!("Failed to open source {:?}", path))?;
    let file_path = path.to_string_lossy().to_string();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.clone());

    let mut items = Vec::new();
    for (row, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read row {} of {:?}", row + 1, path))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse row {} of {:?}", row + 1, path))?;
        let text = value
            .get(&config.text_field)
            .and_then(|v| v.as_str())
            .with_context(|| {
                format!("Row {} of {:?} has no string field '{}'", row + 1, path, config.text_field)
            })?;

        items.push(SourceItem {
            file_path: file_path.clone(),
            file_name: file_name.clone(),
            chunk_index: row,
            start_line: 1,
            text: text.to_string(),
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_windows_without_overlap() {
        let content = (1..=10).map(|i| format!("line number {}", i)).collect::<Vec<_>>().join("\n");
        let config = SourceConfig::new().with_chunk_lines(4).with_min_chunk_chars(1);
        let items = split_into_windows(Path::new("src/lib.rs"), &content, &config);

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].start_line, 1);
        assert_eq!(items[1].start_line, 5);
        assert_eq!(items[2].start_line, 9);
        assert_eq!(items[2].line_count(), 2);
        assert_eq!(items[1].chunk_index, 1);
        assert_eq!(items[0].file_name, "lib.rs");
    }

    #[test]
    fn test_split_into_windows_with_overlap() {
        let content = (1..=8).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let config = SourceConfig::new()
            .with_chunk_lines(4)
            .with_overlap(0.5)
            .with_min_chunk_chars(1);
        let items = split_into_windows(Path::new("a.md"), &content, &config);

        let starts: Vec<usize> = items.iter().map(|i| i.start_line).collect();
        assert_eq!(starts, vec![1, 3, 5]);
    }

    #[test]
    fn test_short_windows_are_dropped() {
        let config = SourceConfig::new().with_chunk_lines(2).with_min_chunk_chars(20);
        let items = split_into_windows(Path::new("a.rs"), "fn a() {}\n\n", &config);
        assert!(items.is_empty());
    }

    #[test]
    fn test_load_source_dir_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() { println!(\"hello\"); }\n").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "binary-ish content that is long").unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("gen.rs"), "fn generated() { todo!() }\n").unwrap();

        let config = SourceConfig::new().with_min_chunk_chars(5);
        let items = load_source(dir.path(), &config).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_path, "keep.rs");
    }

    #[test]
    fn test_load_source_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.jsonl");
        std::fs::write(
            &path,
            "{\"text\": \"Stocks rally\\nas markets open\"}\n\n{\"text\": \"Rain expected\"}\n",
        )
        .unwrap();

        let items = load_source(&path, &SourceConfig::new()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].line_count(), 2);
        assert_eq!(items[1].chunk_index, 2);
        assert_eq!(items[1].file_name, "news.jsonl");
    }

    #[test]
    fn test_load_source_jsonl_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"body\": \"no text here\"}\n").unwrap();
        assert!(load_source(&path, &SourceConfig::new()).is_err());
    }
}
