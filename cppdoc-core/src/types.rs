//! Core data types: source units, classification, compile and execution
//! outcomes, per-program records and the run summary.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CompileError, ExecutionError};

/// A C++ source file read into memory. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub content: String,
    /// Headers named in `#include` directives, in order of appearance.
    pub includes: Vec<String>,
    /// Names of detected free functions and methods.
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub has_main: bool,
    /// True when the program reads from standard input.
    pub requires_input: bool,
    /// Declared types of variables read with `cin >>`.
    pub input_types: Vec<String>,
    /// Non-blank lines that do not start a comment.
    pub lines_of_code: usize,
}

impl SourceUnit {
    /// File name without extension, used to name every scratch artifact.
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

/// File name without extension, falling back to the whole name.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string())
}

/// Heuristic exercise category. Variant order is the scoring order, and a
/// later variant wins a tie.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseCategory {
    Vector,
    Matrix,
    String,
    Structure,
    #[default]
    Default,
}

impl ExerciseCategory {
    /// Scored categories in enumeration order (excludes `Default`).
    pub const SCORED: [ExerciseCategory; 4] = [
        ExerciseCategory::Vector,
        ExerciseCategory::Matrix,
        ExerciseCategory::String,
        ExerciseCategory::Structure,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExerciseCategory::Vector => "vector",
            ExerciseCategory::Matrix => "matrix",
            ExerciseCategory::String => "string",
            ExerciseCategory::Structure => "structure",
            ExerciseCategory::Default => "default",
        }
    }

    /// Human readable title used in the report.
    pub fn title(&self) -> &'static str {
        match self {
            ExerciseCategory::Vector => "Vectors and arrays",
            ExerciseCategory::Matrix => "Matrices",
            ExerciseCategory::String => "Strings",
            ExerciseCategory::Structure => "Structures and classes",
            ExerciseCategory::Default => "General program",
        }
    }
}

impl std::fmt::Display for ExerciseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of the classifier. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: ExerciseCategory,
    /// Estimated complexity, always within 0..=100.
    pub complexity: u8,
    /// Regex matches per category, only for categories with at least one.
    pub matched: BTreeMap<ExerciseCategory, Vec<String>>,
    /// Final score per scored category.
    pub scores: BTreeMap<ExerciseCategory, f64>,
    /// Set when the input could not be read or scanned; the category is then
    /// `Default` and must not be trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.error.is_none()
    }

    /// Categories with at least one regex match, in enumeration order.
    pub fn matched_groups(&self) -> Vec<ExerciseCategory> {
        self.matched.keys().copied().collect()
    }
}

/// Parameters a compiler run was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerInvocation {
    pub program: String,
    pub flags: Vec<String>,
    pub timeout_secs: u64,
    pub source: PathBuf,
    pub output: PathBuf,
}

impl CompilerInvocation {
    /// The full command line, for logs and the report.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.flags.iter().cloned());
        parts.push(self.source.display().to_string());
        parts.push("-o".to_string());
        parts.push(self.output.display().to_string());
        parts.join(" ")
    }
}

/// Result of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileOutcome {
    pub success: bool,
    /// Present only on success.
    pub executable: Option<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    pub invocation: CompilerInvocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CompileError>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl CompileOutcome {
    /// Short reason for a failed compile, suitable for a status line.
    pub fn reason(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

/// Phases of one execution / capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Preparing,
    Launching,
    Waiting,
    Capturing,
    Closing,
    Done,
    Failed,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPhase::Preparing => write!(f, "preparing"),
            ExecutionPhase::Launching => write!(f, "launching"),
            ExecutionPhase::Waiting => write!(f, "waiting"),
            ExecutionPhase::Capturing => write!(f, "capturing"),
            ExecutionPhase::Closing => write!(f, "closing"),
            ExecutionPhase::Done => write!(f, "done"),
            ExecutionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running a compiled program in a terminal session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// True once the program launched and the wait finished, even by timeout.
    pub success: bool,
    /// Captured program output, or the configured placeholder.
    pub stdout: String,
    pub screenshot: Option<PathBuf>,
    #[serde(with = "duration_millis")]
    pub waited: Duration,
    /// The busy indicator never reported idle within the maximum wait.
    pub wait_exhausted: bool,
    /// The wait was abandoned because of a shutdown request.
    pub wait_abandoned: bool,
    /// Fatal error that moved the run to `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Non-fatal capture and close problems, in order.
    pub warnings: Vec<ExecutionError>,
    /// Every phase entered, ending in `Done` or `Failed`.
    pub phases: Vec<ExecutionPhase>,
}

impl ExecutionOutcome {
    pub fn final_phase(&self) -> Option<ExecutionPhase> {
        self.phases.last().copied()
    }
}

/// What happened to one input file. Compile failures carry no execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// The file was rejected before compiling (missing, wrong extension,
    /// unreadable, or the batch was cancelled).
    Skipped { reason: String },
    CompileFailed { compile: CompileOutcome },
    ExecutionFailed {
        compile: CompileOutcome,
        execution: ExecutionOutcome,
    },
    Executed {
        compile: CompileOutcome,
        execution: ExecutionOutcome,
    },
    /// Compile-only runs stop after a successful build.
    Compiled { compile: CompileOutcome },
}

/// Everything the report needs about one processed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramRecord {
    pub name: String,
    pub path: PathBuf,
    /// Source text, empty when the file could not be read.
    pub source: String,
    pub unit: Option<SourceUnit>,
    pub classification: ClassificationResult,
    pub outcome: RecordOutcome,
    pub processed_at: DateTime<Local>,
}

impl ProgramRecord {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            RecordOutcome::Executed { .. } | RecordOutcome::Compiled { .. }
        )
    }

    pub fn compile(&self) -> Option<&CompileOutcome> {
        match &self.outcome {
            RecordOutcome::Skipped { .. } => None,
            RecordOutcome::CompileFailed { compile }
            | RecordOutcome::Compiled { compile }
            | RecordOutcome::ExecutionFailed { compile, .. }
            | RecordOutcome::Executed { compile, .. } => Some(compile),
        }
    }

    pub fn execution(&self) -> Option<&ExecutionOutcome> {
        match &self.outcome {
            RecordOutcome::ExecutionFailed { execution, .. }
            | RecordOutcome::Executed { execution, .. } => Some(execution),
            _ => None,
        }
    }

    pub fn screenshot(&self) -> Option<&Path> {
        self.execution().and_then(|e| e.screenshot.as_deref())
    }

    /// One-line status label.
    pub fn status_label(&self) -> &'static str {
        match &self.outcome {
            RecordOutcome::Skipped { .. } => "Skipped",
            RecordOutcome::CompileFailed { .. } => "Compilation error",
            RecordOutcome::ExecutionFailed { .. } => "Execution error",
            RecordOutcome::Executed { .. } => "Executed successfully",
            RecordOutcome::Compiled { .. } => "Compiled successfully",
        }
    }

    /// Short failure reason for the line item.
    pub fn reason(&self) -> Option<String> {
        match &self.outcome {
            RecordOutcome::Skipped { reason } => Some(reason.clone()),
            RecordOutcome::CompileFailed { compile } => compile.reason(),
            RecordOutcome::ExecutionFailed { execution, .. } => execution
                .error
                .as_ref()
                .map(|e| e.to_string())
                .or_else(|| Some("execution failed".to_string())),
            RecordOutcome::Executed { .. } | RecordOutcome::Compiled { .. } => None,
        }
    }

    /// The compile/execution text block shown in the report.
    ///
    /// A compile failure keeps the compiler's stderr verbatim.
    pub fn details_text(&self) -> String {
        let stamp = self.processed_at.format("%Y-%m-%d %H:%M:%S");
        let mut text = String::new();
        if let Some(compile) = self.compile() {
            text.push_str(&format!("Compiler: {}\n", compile.invocation.program));
            text.push_str(&format!("Flags: {}\n", compile.invocation.flags.join(" ")));
        }
        text.push_str(&format!("Date: {stamp}\n"));
        text.push_str(&format!("Status: {}\n", self.status_label()));
        match &self.outcome {
            RecordOutcome::Skipped { reason } => {
                text.push_str(&format!("Reason: {reason}\n"));
            }
            RecordOutcome::CompileFailed { compile } => {
                text.push_str("Error:\n");
                if compile.stderr.is_empty() {
                    if let Some(reason) = compile.reason() {
                        text.push_str(&reason);
                    }
                } else {
                    text.push_str(&compile.stderr);
                }
            }
            RecordOutcome::Compiled { compile } => {
                if !compile.stderr.is_empty() {
                    text.push_str("Warnings:\n");
                    text.push_str(&compile.stderr);
                }
            }
            RecordOutcome::ExecutionFailed { execution, .. }
            | RecordOutcome::Executed { execution, .. } => {
                text.push_str("Output:\n");
                text.push_str(&execution.stdout);
                if let Some(err) = &execution.error {
                    text.push_str(&format!("\nError:\n{err}"));
                }
                if execution.wait_exhausted {
                    text.push_str(&format!(
                        "\nNote: the program was still running after {}s",
                        execution.waited.as_secs()
                    ));
                }
            }
        }
        text
    }
}

/// A per-file status line for the console and the JSON summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub file: PathBuf,
    pub name: String,
    pub succeeded: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub category: ExerciseCategory,
}

impl From<&ProgramRecord> for LineItem {
    fn from(record: &ProgramRecord) -> Self {
        Self {
            file: record.path.clone(),
            name: record.name.clone(),
            succeeded: record.succeeded(),
            status: record.status_label().to_string(),
            reason: record.reason(),
            category: record.classification.category,
        }
    }
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub items: Vec<LineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    pub report_saved: bool,
    /// Files never started because the batch was cancelled.
    pub cancelled: bool,
    pub success: bool,
}

impl RunSummary {
    pub fn succeeded_count(&self) -> usize {
        self.items.iter().filter(|i| i.succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.succeeded_count()
    }
}

/// Serde helper: durations as integer milliseconds.
mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_outcome(success: bool, stderr: &str) -> CompileOutcome {
        CompileOutcome {
            success,
            executable: success.then(|| PathBuf::from("/tmp/scratch/hello")),
            stdout: String::new(),
            stderr: stderr.to_string(),
            invocation: CompilerInvocation {
                program: "g++".into(),
                flags: vec!["-Wall".into()],
                timeout_secs: 10,
                source: PathBuf::from("hello.cpp"),
                output: PathBuf::from("/tmp/scratch/hello"),
            },
            failure: (!success).then_some(CompileError::CompilerFailed { exit_code: Some(1) }),
            elapsed: Duration::from_millis(120),
        }
    }

    fn record(outcome: RecordOutcome) -> ProgramRecord {
        ProgramRecord {
            name: "hello".into(),
            path: PathBuf::from("hello.cpp"),
            source: "int main() {}".into(),
            unit: None,
            classification: ClassificationResult::default(),
            outcome,
            processed_at: Local::now(),
        }
    }

    #[test]
    fn test_category_order_and_labels() {
        assert!(ExerciseCategory::Vector < ExerciseCategory::Structure);
        assert_eq!(ExerciseCategory::Matrix.to_string(), "matrix");
        assert_eq!(ExerciseCategory::default(), ExerciseCategory::Default);
        assert!(!ExerciseCategory::SCORED.contains(&ExerciseCategory::Default));
    }

    #[test]
    fn test_command_line() {
        let outcome = compile_outcome(true, "");
        assert_eq!(
            outcome.invocation.command_line(),
            "g++ -Wall hello.cpp -o /tmp/scratch/hello"
        );
    }

    #[test]
    fn test_compile_failure_keeps_stderr_verbatim() {
        let stderr = "hello.cpp:1:5: error: expected ';' before '}' token";
        let rec = record(RecordOutcome::CompileFailed {
            compile: compile_outcome(false, stderr),
        });
        assert!(!rec.succeeded());
        assert!(rec.execution().is_none());
        assert!(rec.screenshot().is_none());
        assert!(rec.details_text().contains(stderr));
        assert_eq!(rec.reason().as_deref(), Some("Compiler exited with status 1"));
    }

    #[test]
    fn test_exhausted_wait_is_noted_in_details() {
        let execution = ExecutionOutcome {
            success: true,
            stdout: "Enter a number: ".into(),
            screenshot: None,
            waited: Duration::from_secs(30),
            wait_exhausted: true,
            wait_abandoned: false,
            error: None,
            warnings: Vec::new(),
            phases: vec![ExecutionPhase::Waiting, ExecutionPhase::Done],
        };
        let rec = record(RecordOutcome::Executed {
            compile: compile_outcome(true, ""),
            execution: execution.clone(),
        });
        assert!(rec.succeeded());
        let details = rec.details_text();
        assert!(details.contains("Output:\nEnter a number: "), "{details}");
        assert!(
            details.ends_with("\nNote: the program was still running after 30s"),
            "{details}"
        );

        let finished = record(RecordOutcome::Executed {
            compile: compile_outcome(true, ""),
            execution: ExecutionOutcome {
                wait_exhausted: false,
                ..execution
            },
        });
        assert!(!finished.details_text().contains("Note:"));
    }

    #[test]
    fn test_line_item_from_record() {
        let rec = record(RecordOutcome::Skipped {
            reason: "not a .cpp file".into(),
        });
        let item = LineItem::from(&rec);
        assert!(!item.succeeded);
        assert_eq!(item.status, "Skipped");
        assert_eq!(item.reason.as_deref(), Some("not a .cpp file"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("dir/ejercicio1.cpp")), "ejercicio1");
        assert_eq!(file_stem(Path::new("noext")), "noext");
    }

    #[test]
    fn test_summary_counts() {
        let ok = LineItem::from(&record(RecordOutcome::Compiled {
            compile: compile_outcome(true, ""),
        }));
        let bad = LineItem::from(&record(RecordOutcome::Skipped {
            reason: "missing".into(),
        }));
        let summary = RunSummary {
            run_id: "r".into(),
            items: vec![ok, bad],
            report_path: None,
            report_saved: false,
            cancelled: false,
            success: false,
        };
        assert_eq!(summary.succeeded_count(), 1);
        assert_eq!(summary.failed_count(), 1);
    }
}
