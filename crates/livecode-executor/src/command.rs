//! Interpreter command lines and executable lookup.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Interpreter command error.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("Runtime command cannot be parsed: {0}")]
    Unparseable(String),
    #[error("Runtime command is empty")]
    Empty,
    #[error("Runtime not found: {0}")]
    NotFound(String),
}

/// Interpreter invocation located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub executable: PathBuf,
    /// Arguments placed before the script path.
    pub args: Vec<String>,
}

/// Interpreter command line such as `npx ts-node`.
///
/// The line is split shell-style; the script path is appended after
/// any extra arguments when a program runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCommand {
    line: String,
    extra_args: Vec<String>,
}

impl RuntimeCommand {
    #[must_use]
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            extra_args: Vec::new(),
        }
    }

    /// Append an argument after the command line.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Replace the command line, keeping extra arguments.
    #[must_use]
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Program name and its arguments, without the script.
    ///
    /// # Errors
    /// Returns error if the line has unbalanced quotes or no program.
    pub fn split(&self) -> Result<(String, Vec<String>), CommandError> {
        let mut words =
            shlex::split(&self.line).ok_or_else(|| CommandError::Unparseable(self.line.clone()))?;
        if words.is_empty() {
            return Err(CommandError::Empty);
        }
        let program = words.remove(0);
        words.extend(self.extra_args.iter().cloned());
        Ok((program, words))
    }

    /// Split the line and locate the program.
    ///
    /// # Errors
    /// Returns error if the line is invalid or the program is missing.
    pub async fn resolve(&self) -> Result<ResolvedCommand, CommandError> {
        let (program, args) = self.split()?;
        let executable = find_executable(&program)
            .await
            .ok_or(CommandError::NotFound(program))?;
        Ok(ResolvedCommand { executable, args })
    }
}

/// Locate an executable.
///
/// Names containing a path separator must point at an existing file;
/// bare names are searched on `PATH`.
pub async fn find_executable(name: &str) -> Option<PathBuf> {
    if name.trim().is_empty() {
        return None;
    }

    let path = Path::new(name);
    if path.is_absolute() || path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let name = name.to_string();
    tokio::task::spawn_blocking(move || which::which(name).ok())
        .await
        .ok()
        .flatten()
}
