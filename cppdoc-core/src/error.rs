//! Error types for the cppdoc core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, classification, compilation, execution capture,
//! report serialization and scratch cleanup.

use serde::Serialize;
use std::path::PathBuf;

/// Top-level error type for the cppdoc core library.
#[derive(Debug, thiserror::Error)]
pub enum CppdocError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Cleanup error: {0}")]
    Cleanup(#[from] CleanupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised while reading or scanning a source file.
///
/// Never fatal: the classifier downgrades to the default category and
/// attaches the message to its result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Cannot read source file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Errors from a single compiler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileError {
    #[error("Compiler exited with status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    CompilerFailed { exit_code: Option<i32> },

    #[error("Could not start compiler '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("Compilation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Cannot prepare scratch directory {path}: {message}")]
    Scratch { path: PathBuf, message: String },
}

/// Errors from the execution and capture phases.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("Could not write launcher script {path}: {message}")]
    Script { path: PathBuf, message: String },

    #[error("Could not start terminal: {message}")]
    Launch { message: String },

    #[error("Terminal status query failed: {message}")]
    Status { message: String },

    #[error("Wait abandoned after a shutdown request")]
    Abandoned,

    #[error("Screenshot failed: {message}")]
    Capture { message: String },

    #[error("Could not close terminal session: {message}")]
    Close { message: String },
}

/// Errors from report rendering and saving.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Render failed for {path}: {message}")]
    Render { path: PathBuf, message: String },

    #[error("No usable font family found (searched: {searched})")]
    FontNotFound { searched: String },

    #[error("Rendered file {path} is missing or empty")]
    EmptyOutput { path: PathBuf },

    #[error("Report could not be saved to {path} after {attempts} attempts: {last}")]
    AllAttemptsFailed {
        path: PathBuf,
        attempts: usize,
        last: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from scratch directory maintenance.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Cannot list scratch directory {path}: {message}")]
    List { path: PathBuf, message: String },
}

/// A type alias for results using the top-level `CppdocError`.
pub type Result<T> = std::result::Result<T, CppdocError>;
