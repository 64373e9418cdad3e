//! Process-isolated code execution.

use std::{
    collections::HashMap,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use livecode_core::{CodeExecutor, ExecutionResult, Language};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    sync::{OnceCell, Semaphore},
};

use crate::command::{CommandError, ResolvedCommand, RuntimeCommand};

/// Default wall-clock limit for interpreted runs.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// TypeScript pays for compilation on every run.
pub const TYPESCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on captured bytes per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How long to keep draining pipes after the process exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

const TRUNCATED_MARKER: &str = "\n... [output truncated]";

/// How one language is run.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    /// Interpreter command; the script path is appended.
    pub command: RuntimeCommand,
    /// Wall-clock limit, after which the process group is killed.
    pub timeout: Duration,
}

impl RuntimeSpec {
    /// Create a runtime spec.
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: RuntimeCommand::new(command),
            timeout,
        }
    }

    /// Default runtime for a language.
    #[must_use]
    pub fn default_for(language: Language) -> Self {
        match language {
            Language::JavaScript => Self::new("node", DEFAULT_TIMEOUT),
            Language::TypeScript => Self::new("npx ts-node", TYPESCRIPT_TIMEOUT),
            Language::Python => Self::new("python3", DEFAULT_TIMEOUT),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    runtimes: HashMap<Language, RuntimeSpec>,
    /// Captured bytes per stream before truncation.
    pub max_output_bytes: usize,
    /// Runs allowed at the same time.
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            runtimes: Language::ALL
                .into_iter()
                .map(|lang| (lang, RuntimeSpec::default_for(lang)))
                .collect(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent: 4,
        }
    }
}

impl ExecutorConfig {
    /// Runtime used for `language`.
    #[must_use]
    pub fn runtime(&self, language: Language) -> RuntimeSpec {
        self.runtimes
            .get(&language)
            .cloned()
            .unwrap_or_else(|| RuntimeSpec::default_for(language))
    }

    /// Replace the runtime for a language.
    #[must_use]
    pub fn with_runtime(mut self, language: Language, spec: RuntimeSpec) -> Self {
        self.runtimes.insert(language, spec);
        self
    }

    /// Replace only the interpreter command for a language.
    #[must_use]
    pub fn with_command(self, language: Language, command: impl Into<String>) -> Self {
        let spec = self.runtime(language);
        self.with_runtime(
            language,
            RuntimeSpec {
                command: spec.command.with_line(command),
                ..spec
            },
        )
    }

    /// Set the per-stream output cap.
    #[must_use]
    pub const fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the concurrency limit.
    #[must_use]
    pub const fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type Resolved = Result<ResolvedCommand, CommandError>;

/// Runs each submission as a separate OS process group.
///
/// Timeouts kill the whole group, so runaway loops and any processes
/// they spawned are stopped rather than left running.
pub struct ProcessExecutor {
    config: ExecutorConfig,
    resolved: HashMap<Language, OnceCell<ResolvedCommand>>,
    permits: Semaphore,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ProcessExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            resolved: Language::ALL
                .into_iter()
                .map(|lang| (lang, OnceCell::new()))
                .collect(),
            config,
            permits,
        }
    }

    /// Executor configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Resolve the interpreter for `language`.
    ///
    /// A successful lookup is cached per language and concurrent first
    /// callers await the same lookup. Failures are not cached, so a
    /// runtime installed after startup is picked up on the next run.
    async fn runtime(&self, language: Language) -> Resolved {
        let Some(cell) = self.resolved.get(&language) else {
            return self.config.runtime(language).command.resolve().await;
        };
        cell.get_or_try_init(|| async {
            let resolved = self.config.runtime(language).command.resolve().await;
            match &resolved {
                Ok(runtime) => {
                    tracing::debug!(%language, path = %runtime.executable.display(), "Resolved runtime");
                }
                Err(e) => tracing::warn!(%language, "Runtime unavailable: {e}"),
            }
            resolved
        })
        .await
        .cloned()
    }

    async fn run(&self, code: &str, language: Language) -> Result<ExecutionResult, RunError> {
        let started = Instant::now();
        let spec = self.config.runtime(language);
        let runtime = self.runtime(language).await?;

        let dir = tempfile::Builder::new().prefix("livecode-").tempdir()?;
        let script = dir
            .path()
            .join(format!("script.{}", language.file_extension()));
        tokio::fs::write(&script, code).await?;

        let mut cmd = Command::new(&runtime.executable);
        cmd.args(&runtime.args)
            .arg(&script)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn()?;
        let cap = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child.inner().stdout.take(), cap));
        let stderr_task = tokio::spawn(read_capped(child.inner().stderr.take(), cap));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(%language, timeout = ?spec.timeout, "Execution timed out, killing process group");
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill timed out process group: {e}");
                }
                stdout_task.abort();
                stderr_task.abort();
                return Ok(ExecutionResult::timed_out(spec.timeout));
            }
        };

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let elapsed = started.elapsed();
        tracing::debug!(%language, ?status, ?elapsed, "Execution finished");

        if status.success() {
            let combined = if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{}\n{}", stdout.trim_end(), stderr.trim_end())
            };
            Ok(ExecutionResult::succeeded(combined.trim(), elapsed))
        } else {
            let error = if stderr.trim().is_empty() {
                status.code().map_or_else(
                    || "Process terminated by signal".to_string(),
                    |code| format!("Process exited with status {code}"),
                )
            } else {
                stderr.trim_end().to_string()
            };
            Ok(ExecutionResult::failed(stdout.trim_end(), error, elapsed))
        }
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    async fn execute(&self, code: &str, language: Language) -> ExecutionResult {
        let started = Instant::now();
        let Ok(_permit) = self.permits.acquire().await else {
            return ExecutionResult::failed("", "Executor is shut down", started.elapsed());
        };

        match self.run(code, language).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%language, "Execution failed before completion: {e}");
                ExecutionResult::failed("", e.to_string(), started.elapsed())
            }
        }
    }
}

async fn collect(task: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(OUTPUT_GRACE, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Output reader failed: {e}");
            String::new()
        }
        Err(_) => {
            tracing::warn!("Output pipe still open after exit, discarding");
            String::new()
        }
    }
}

/// Read a stream to the end, keeping at most `cap` bytes.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut buf = Vec::new();
    let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
    if let Err(e) = (&mut reader).take(limit).read_to_end(&mut buf).await {
        tracing::debug!("Output read error: {e}");
    }

    let truncated = buf.len() > cap;
    if truncated {
        buf.truncate(cap);
        // keep draining so the child never blocks on a full pipe
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    }

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str(TRUNCATED_MARKER);
    }
    text
}
