//! Console output and interactive prompts.

use cppdoc_core::discovery::validate_source;
use cppdoc_core::envcheck::EnvReport;
use cppdoc_core::pipeline::{PipelineObserver, stderr_excerpt};
use cppdoc_core::{CleanupReport, ProgramRecord, RunSummary};
use dialoguer::{Confirm, Input};
use std::path::{Path, PathBuf};

/// Prints a ✓ / ✗ line per file.
pub struct ConsoleObserver {
    /// Show the compiler's stderr under failed compiles.
    show_stderr: bool,
}

impl ConsoleObserver {
    pub fn new(show_stderr: bool) -> Self {
        Self { show_stderr }
    }
}

impl PipelineObserver for ConsoleObserver {
    fn file_started(&self, index: usize, total: usize, path: &Path) {
        println!("\n[{}/{}] Processing: {}", index + 1, total, path.display());
    }

    fn file_finished(&self, record: &ProgramRecord) {
        println!("{}", line_item(record));
        if self.show_stderr && !record.succeeded() {
            if let Some(compile) = record.compile() {
                let excerpt = stderr_excerpt(&compile.stderr);
                for line in excerpt.lines() {
                    println!("    {line}");
                }
            }
        }
    }
}

/// `✓ name: status` or `✗ name: status` followed by the reason.
pub fn line_item(record: &ProgramRecord) -> String {
    let mark = if record.succeeded() { '✓' } else { '✗' };
    let mut line = format!("{mark} {}: {}", record.name, record.status_label());
    if let Some(reason) = record.reason() {
        line.push_str(&format!("\n  Error: {reason}"));
    }
    line
}

pub fn print_summary(summary: &RunSummary) {
    println!(
        "\n{} of {} program(s) processed successfully",
        summary.succeeded_count(),
        summary.items.len()
    );
    if summary.cancelled {
        println!("Run interrupted; remaining files were skipped");
    }
    if let Some(path) = &summary.report_path {
        if summary.report_saved {
            println!("Report saved to {}", path.display());
        } else {
            println!("Error generating the report");
        }
    }
}

pub fn print_cleanup(report: &CleanupReport) {
    println!(
        "Cleanup finished: {} removed, {} kept, {} failed",
        report.removed.len(),
        report.kept.len(),
        report.failed.len()
    );
    for (path, error) in &report.failed {
        println!("  could not remove {}: {error}", path.display());
    }
}

pub fn print_env_failures(report: &EnvReport) {
    eprintln!("Warning: some environment checks failed:");
    for item in report.failures() {
        eprintln!("  ✗ {}: {}", item.name, item.detail);
    }
}

pub fn confirm_continue() -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt("Continue anyway?")
        .default(false)
        .interact()?)
}

/// Ask for a source path until a valid one is given or `q` is entered.
pub fn prompt_for_source() -> anyhow::Result<Option<PathBuf>> {
    loop {
        let answer: String = Input::new()
            .with_prompt("Path of a .cpp file (q to quit)")
            .interact_text()?;
        match parse_answer(&answer) {
            Answer::Quit => return Ok(None),
            Answer::Path(path) => match validate_source(&path) {
                Ok(()) => return Ok(Some(path)),
                Err(reason) => eprintln!("  {}: {reason}", path.display()),
            },
        }
    }
}

#[derive(Debug, PartialEq)]
enum Answer {
    Quit,
    Path(PathBuf),
}

/// Drag-and-drop into a terminal quotes paths and escapes spaces.
fn parse_answer(answer: &str) -> Answer {
    let trimmed = answer.trim();
    if trimmed.eq_ignore_ascii_case("q") || trimmed.is_empty() {
        return Answer::Quit;
    }
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(trimmed);
    Answer::Path(PathBuf::from(unquoted.replace("\\ ", " ")))
}
