//! Subprocess engine client
//!
//! Every operation spawns exactly one engine process:
//! `<binary> <args...> <command>`, with the run configuration passed as
//! environment variables scoped to the child and the JSON payload written to
//! stdin. Each invocation is bounded by a timeout and a cancellation token.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineSettings, ResponseFraming, SearchMethod};
use crate::corpus::{EmbeddingRecord, QueryRecord, RecordLimits};
use crate::error::{excerpt, DataError, HarnessError, InvocationError};

use super::protocol::{parse_config_listing, parse_search_output, SearchResponse};
use super::traits::{AddOutcome, EngineBackend};

/// Grace period for a killed child to be reaped
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Least time allowed for draining pipes after the child has exited
const DRAIN_GRACE: Duration = Duration::from_millis(100);

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Immutable run-scoped engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub storage_path: PathBuf,
    pub dimensions: usize,
    pub label_size: usize,
    /// Maximum serialized metadata size in bytes
    pub chunk_size: usize,
    pub timeout: Duration,
    pub env_prefix: String,
    pub framing: ResponseFraming,
}

impl EngineConfig {
    /// Establish the configuration every later operation runs under
    pub fn configure(
        dimensions: usize,
        label_size: usize,
        chunk_size: usize,
        storage_path: impl Into<PathBuf>,
    ) -> Result<Self, HarnessError> {
        let storage_path = storage_path.into();
        if dimensions == 0 {
            return Err(HarnessError::configuration("dimensions must be positive"));
        }
        if label_size == 0 {
            return Err(HarnessError::configuration("label_size must be positive"));
        }
        if chunk_size == 0 {
            return Err(HarnessError::configuration("chunk_size must be positive"));
        }
        if storage_path.as_os_str().is_empty() {
            return Err(HarnessError::configuration("storage path must not be empty"));
        }

        let defaults = EngineSettings::default();
        Ok(Self {
            binary: defaults.binary,
            args: defaults.args,
            storage_path,
            dimensions,
            label_size,
            chunk_size,
            timeout: Duration::from_secs(defaults.timeout_secs),
            env_prefix: defaults.env_prefix,
            framing: defaults.framing,
        })
    }

    /// Build from the `[engine]` section of the harness config
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, HarnessError> {
        if settings.timeout_secs == 0 {
            return Err(HarnessError::configuration("timeout_secs must be positive"));
        }
        if settings.env_prefix.trim().is_empty() {
            return Err(HarnessError::configuration("env_prefix must not be empty"));
        }
        Ok(Self::configure(
            settings.dimensions,
            settings.label_size,
            settings.chunk_size,
            &settings.storage_path,
        )?
        .with_binary(&settings.binary)
        .with_args(settings.args.clone())
        .with_timeout(Duration::from_secs(settings.timeout_secs))
        .with_env_prefix(&settings.env_prefix)
        .with_framing(settings.framing.clone()))
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    pub fn with_framing(mut self, framing: ResponseFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Limits every record must satisfy before `add`
    pub fn limits(&self) -> RecordLimits {
        RecordLimits {
            dimensions: self.dimensions,
            label_size: self.label_size,
            chunk_size: self.chunk_size,
        }
    }

    fn env_var(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }
}

// =============================================================================
// INVOCATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Add,
    Search,
    List,
    PrintConfig,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Search => "search",
            Self::List => "list",
            Self::PrintConfig => "print-config",
        }
    }
}

/// Captured output of one successful invocation
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// Wall time from spawn to exit
    pub elapsed: Duration,
}

/// Engine client backed by one child process per operation
pub struct EngineClient {
    config: EngineConfig,
    cancel: CancellationToken,
}

impl EngineClient {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a run-wide cancellation token (e.g. tied to Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn the engine once, feed `payload` on stdin and wait for it to exit
    ///
    /// `top_k` and `search_method` are exported only when given; otherwise
    /// they are removed from the child's environment so values inherited from
    /// the harness process cannot leak in.
    pub async fn invoke(
        &self,
        command: EngineCommand,
        payload: Option<&str>,
        top_k: Option<usize>,
        search_method: Option<&SearchMethod>,
    ) -> Result<RawOutput, InvocationError> {
        let name = command.name();
        if self.cancel.is_cancelled() {
            return Err(InvocationError::Cancelled {
                command: name.to_string(),
            });
        }

        let config = &self.config;
        let mut cmd = Command::new(&config.binary);
        cmd.kill_on_drop(true);
        cmd.args(&config.args).arg(name);
        cmd.env(config.env_var("PATH"), &config.storage_path)
            .env(config.env_var("DIMENSIONS"), config.dimensions.to_string())
            .env(config.env_var("LABEL_SIZE"), config.label_size.to_string())
            .env(config.env_var("CHUNK_SIZE"), config.chunk_size.to_string());
        match top_k {
            Some(k) => cmd.env(config.env_var("TOP_K"), k.to_string()),
            None => cmd.env_remove(config.env_var("TOP_K")),
        };
        match search_method {
            Some(method) => cmd.env(config.env_var("SEARCH_METHOD"), method.name()),
            None => cmd.env_remove(config.env_var("SEARCH_METHOD")),
        };
        cmd.stdin(if payload.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| InvocationError::Spawn {
            program: config.binary.display().to_string(),
            source,
        })?;
        tracing::debug!("Spawned engine `{}` (pid {:?})", name, child.id());

        let mut stdin_task = match (payload, child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => {
                let mut bytes = Vec::with_capacity(payload.len() + 1);
                bytes.extend_from_slice(payload.as_bytes());
                bytes.push(b'\n');
                Some(tokio::spawn(async move {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                }))
            }
            _ => None,
        };

        let io_error = |source: io::Error| InvocationError::Io {
            command: name.to_string(),
            source,
        };
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(io::Error::other("stdout unavailable")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(io::Error::other("stderr unavailable")))?;

        let mut stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let mut stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });
        let abort_io = || {
            if let Some(task) = &stdin_task {
                task.abort();
            }
            stdout_task.abort();
            stderr_task.abort();
        };

        let status = tokio::select! {
            _ = self.cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
                abort_io();
                return Err(InvocationError::Cancelled { command: name.to_string() });
            }
            res = tokio::time::timeout(config.timeout, child.wait()) => match res {
                Ok(Ok(status)) => status,
                Ok(Err(source)) => {
                    abort_io();
                    return Err(io_error(source));
                }
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
                    abort_io();
                    return Err(InvocationError::TimedOut {
                        command: name.to_string(),
                        timeout: config.timeout,
                    });
                }
            }
        };
        let elapsed = start.elapsed();

        // A process left behind by the engine can hold the pipes open after
        // the child exits, so draining shares the invocation deadline.
        let drain_limit = config.timeout.saturating_sub(elapsed).max(DRAIN_GRACE);
        let drained = tokio::time::timeout(drain_limit, async {
            let stdin_result = match stdin_task.as_mut() {
                Some(task) => task.await.ok(),
                None => None,
            };
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (stdin_result, stdout, stderr)
        })
        .await;
        let (stdin_result, stdout, stderr) = match drained {
            Ok(output) => output,
            Err(_elapsed) => {
                if let Some(task) = &stdin_task {
                    task.abort();
                }
                stdout_task.abort();
                stderr_task.abort();
                tracing::warn!("Engine `{}` exited but its output pipes stayed open", name);
                return Err(InvocationError::TimedOut {
                    command: name.to_string(),
                    timeout: config.timeout,
                });
            }
        };

        // The engine may exit without draining stdin
        if let Some(Err(e)) = stdin_result {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(io_error(e));
            }
        }
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            return Err(InvocationError::NonZeroExit {
                command: name.to_string(),
                status: status.to_string(),
                stderr: excerpt(&stderr, 500),
            });
        }

        tracing::debug!("Engine `{}` finished in {:.1}ms", name, elapsed.as_secs_f64() * 1000.0);
        Ok(RawOutput {
            stdout,
            stderr,
            elapsed,
        })
    }

    /// Parsed `key=value` configuration as the engine sees it
    pub async fn print_config(&self) -> Result<BTreeMap<String, String>, HarnessError> {
        let raw = self.invoke(EngineCommand::PrintConfig, None, None, None).await?;
        Ok(parse_config_listing(&raw.stdout))
    }
}

fn record_payload(record: &EmbeddingRecord) -> Result<String, HarnessError> {
    record.to_payload().map_err(|e| unserializable(record, e))
}

fn unserializable(record: &EmbeddingRecord, err: serde_json::Error) -> HarnessError {
    DataError::Unserializable {
        label: record.label.clone(),
        reason: err.to_string(),
    }
    .into()
}

/// Whether stderr carries the engine's "label already exists" report
fn reports_duplicate(stderr: &str) -> bool {
    stderr.to_lowercase().contains("already exists")
}

#[async_trait::async_trait]
impl EngineBackend for EngineClient {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn verify(&self) -> Result<(), HarnessError> {
        let listing = match self.print_config().await {
            Ok(listing) => listing,
            Err(HarnessError::Invocation(e @ InvocationError::Spawn { .. })) => {
                return Err(HarnessError::configuration(format!("engine unreachable: {}", e)));
            }
            Err(HarnessError::Invocation(e @ InvocationError::Cancelled { .. })) => {
                return Err(e.into());
            }
            Err(e) => {
                return Err(HarnessError::configuration(format!(
                    "engine rejected the configuration: {}",
                    e
                )));
            }
        };

        match listing.get("dimensions").map(|d| d.parse::<usize>()) {
            Some(Ok(dimensions)) if dimensions != self.config.dimensions => {
                Err(HarnessError::configuration(format!(
                    "engine reports {} dimensions, harness is configured for {}",
                    dimensions, self.config.dimensions
                )))
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(_)) | None => {
                tracing::warn!("Engine did not report its dimensions; skipping the check");
                Ok(())
            }
        }
    }

    async fn add(&self, record: &EmbeddingRecord) -> Result<AddOutcome, HarnessError> {
        let payload = record_payload(record)?;
        let raw = self
            .invoke(EngineCommand::Add, Some(&payload), None, None)
            .await?;
        if reports_duplicate(&raw.stderr) {
            return Ok(AddOutcome::Duplicate);
        }
        Ok(AddOutcome::Added)
    }

    async fn search(
        &self,
        query: &QueryRecord,
        top_k: usize,
        method: &SearchMethod,
    ) -> Result<SearchResponse, HarnessError> {
        let payload = record_payload(query)?;
        let raw = self
            .invoke(EngineCommand::Search, Some(&payload), Some(top_k), Some(method))
            .await?;
        parse_search_output(&raw.stdout, &self.config.framing)
    }

    async fn list(&self) -> Result<String, HarnessError> {
        let raw = self.invoke(EngineCommand::List, None, None, None).await?;
        Ok(raw.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Metadata;

    #[test]
    fn test_configure_rejects_zero_dimensions() {
        let err = EngineConfig::configure(0, 32, 4096, "db").unwrap_err();
        assert!(err.is_fatal());
        assert!(EngineConfig::configure(384, 32, 4096, "").is_err());
    }

    #[test]
    fn test_from_settings_carries_everything() {
        let settings = EngineSettings {
            binary: PathBuf::from("/usr/local/bin/vekta"),
            args: vec!["--quiet".into()],
            timeout_secs: 3,
            env_prefix: "ENGINE".into(),
            ..EngineSettings::default()
        };
        let config = EngineConfig::from_settings(&settings).unwrap();
        assert_eq!(config.binary, PathBuf::from("/usr/local/bin/vekta"));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.env_var("TOP_K"), "ENGINE_TOP_K");
        assert_eq!(
            config.limits(),
            RecordLimits { dimensions: 384, label_size: 32, chunk_size: 4096 }
        );

        let zero_timeout = EngineSettings { timeout_secs: 0, ..EngineSettings::default() };
        assert!(EngineConfig::from_settings(&zero_timeout).is_err());
    }

    #[test]
    fn test_serialization_failure_is_a_data_error() {
        let record = EmbeddingRecord {
            label: "doc_7".into(),
            vector: vec![0.0; 4],
            metadata: Metadata {
                file_path: "src/lib.rs".into(),
                file_name: "lib.rs".into(),
                chunk_index: 0,
                start_line: 1,
                end_line: 3,
                content_preview: "pub mod engine;".into(),
            },
        };
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = unserializable(&record, cause);
        assert!(matches!(err, HarnessError::Data(DataError::Unserializable { ref label, .. }) if label == "doc_7"));
        assert_eq!(err.kind(), "data");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(EngineCommand::PrintConfig.name(), "print-config");
        assert_eq!(EngineCommand::Add.name(), "add");
    }

    #[test]
    fn test_reports_duplicate() {
        assert!(reports_duplicate(
            "Warning: Label 'doc_0' already exists in the database. Skipping.\n"
        ));
        assert!(!reports_duplicate(""));
    }

    #[tokio::test]
    async fn test_cancelled_client_never_spawns() {
        let config = EngineConfig::configure(8, 16, 1024, "db")
            .unwrap()
            .with_binary("/definitely/not/a/real/engine");
        let client = EngineClient::new(config);
        client.cancellation().cancel();
        let err = client
            .invoke(EngineCommand::List, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unreachable() {
        let config = EngineConfig::configure(8, 16, 1024, "db")
            .unwrap()
            .with_binary("/definitely/not/a/real/engine");
        let err = EngineClient::new(config).verify().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unreachable"));
    }
}
