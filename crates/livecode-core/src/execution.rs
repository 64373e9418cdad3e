//! Normalized outcome of running submitted code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output shown when a successful run printed nothing.
pub const NO_OUTPUT: &str = "Code executed successfully (no output)";

/// Result of one execution request.
///
/// Failures are values: every error path produces `success: false`
/// with a non-empty `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time in milliseconds.
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Successful run.
    #[must_use]
    pub fn succeeded(output: impl Into<String>, elapsed: Duration) -> Self {
        let output = output.into();
        Self {
            success: true,
            output: if output.is_empty() {
                NO_OUTPUT.to_string()
            } else {
                output
            },
            error: None,
            execution_time_ms: millis(elapsed),
        }
    }

    /// Failed run with whatever output was produced before the failure.
    #[must_use]
    pub fn failed(output: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: output.into(),
            error: Some(if error.trim().is_empty() {
                "Unknown error occurred".to_string()
            } else {
                error
            }),
            execution_time_ms: millis(elapsed),
        }
    }

    /// Run killed after exceeding `limit`.
    #[must_use]
    pub fn timed_out(limit: Duration) -> Self {
        Self::failed(
            "",
            format!("Execution timed out ({}s limit)", limit.as_secs_f64()),
            limit,
        )
    }

    /// Request for a language tag that has no runtime.
    #[must_use]
    pub fn unsupported(tag: &str) -> Self {
        Self::failed("", format!("Unsupported language: {tag}"), Duration::ZERO)
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
