//! Process-isolated code execution.
//!
//! Provides:
//! - `ProcessExecutor` - Run submissions in killable process groups
//! - Runtime command building and executable resolution

pub mod command;
pub mod process;

pub use command::{CommandError, ResolvedCommand, RuntimeCommand, find_executable};
pub use process::{ExecutorConfig, ProcessExecutor, RuntimeSpec};
