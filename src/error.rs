//! Error taxonomy for the harness core
//!
//! Configuration errors abort a run. Everything else is scoped to a single
//! record or a single engine invocation and is downgraded by the driver to a
//! skip or a zero-result measurement.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Top-level harness error
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid or missing run configuration, or an unreachable engine
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The engine process could not be run to a successful exit
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The engine exited cleanly but its output had no usable payload
    #[error("malformed search response: {reason}")]
    ResponseParse { reason: String, excerpt: String },

    /// A record is unusable (duplicate label, wrong dimensions, ...)
    #[error(transparent)]
    Data(#[from] DataError),
}

impl HarnessError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn response_parse(reason: impl Into<String>, output: &str) -> Self {
        Self::ResponseParse {
            reason: reason.into(),
            excerpt: excerpt(output, 200),
        }
    }

    /// Fatal errors terminate the run; the rest are recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Invocation(InvocationError::Cancelled { .. })
        )
    }

    /// Short category name used in logs and per-query records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Invocation(_) => "invocation",
            Self::ResponseParse { .. } => "response_parse",
            Self::Data(_) => "data",
        }
    }
}

/// Failure to run one engine command to a zero exit status
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to spawn engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("engine `{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("engine `{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("engine `{command}` was cancelled")]
    Cancelled { command: String },

    #[error("I/O error while running engine `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Per-record data problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("duplicate label `{label}`")]
    DuplicateLabel { label: String },

    #[error("record `{label}` has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("record `{label}` has a non-finite component at index {index}")]
    NonFiniteComponent { label: String, index: usize },

    #[error("label `{label}` is {actual} bytes, limit is {limit}")]
    LabelTooLong {
        label: String,
        actual: usize,
        limit: usize,
    },

    #[error("metadata for `{label}` is {actual} bytes, limit is {limit}")]
    MetadataTooLarge {
        label: String,
        actual: usize,
        limit: usize,
    },

    #[error("record `{label}` could not be serialized: {reason}")]
    Unserializable { label: String, reason: String },

    #[error("requested {requested} samples but the source only has {available}")]
    InsufficientSource { requested: usize, available: usize },

    #[error("query count {query_count} must be smaller than the corpus size {corpus_len}")]
    InvalidPartition {
        query_count: usize,
        corpus_len: usize,
    },
}

/// First `max_chars` characters of `text` on a single line
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(HarnessError::configuration("no engine").is_fatal());
        assert!(HarnessError::from(InvocationError::Cancelled {
            command: "search".into()
        })
        .is_fatal());
        assert!(!HarnessError::from(InvocationError::TimedOut {
            command: "search".into(),
            timeout: Duration::from_secs(1),
        })
        .is_fatal());
        assert!(!HarnessError::from(DataError::DuplicateLabel { label: "doc_0".into() }).is_fatal());
        assert!(!HarnessError::response_parse("no object", "Debug: hi").is_fatal());
    }

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n  b\tc", 10), "a b c");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
    }
}
