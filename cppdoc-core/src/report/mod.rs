//! Report model, builder and save policy.
//!
//! The builder turns accumulated [`ProgramRecord`]s into a flat list of
//! [`Block`]s. Ordering, listing sanitisation and placeholder substitution
//! are decided here; a [`ReportRenderer`] only maps blocks to a document
//! format.

mod recording;

pub use recording::RecordingRenderer;

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ReportConfig, ReportLayout};
use crate::error::ReportError;
use crate::types::ProgramRecord;

/// Tab stops used when expanding tabs in listings.
pub const TAB_WIDTH: usize = 4;

const INTRO: &str = "This report was produced by cppdoc, a batch compiler and documenter \
for C++ exercises. Every program below was compiled with the configured toolchain, run \
interactively in a terminal window and captured in a screenshot. Each entry lists the \
source code, the compilation and execution result and a short technical analysis of the \
code's structure.";

const NO_SCREENSHOT: &str =
    "No screenshot was captured for this program. Its output is listed above when available.";
const SCREENSHOT_OMITTED: &str = "Screenshot omitted from this copy of the report.";

/// Format-neutral report content.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Subtitle(String),
    Heading(String),
    Subheading(String),
    Paragraph(String),
    /// Preformatted text, already sanitised line by line.
    Code(String),
    /// Label / value rows.
    Fields(Vec<(String, String)>),
    /// An image verified to exist and be non-empty when the blocks were built.
    Image { path: PathBuf, max_width_mm: f64 },
    /// Explanatory text standing in for a missing artifact.
    Placeholder(String),
    PageBreak,
    Spacer,
}

/// Renders blocks to a document on disk.
pub trait ReportRenderer: Send + Sync {
    /// Renderer name for logging.
    fn name(&self) -> &str;

    fn render(&self, blocks: &[Block], target: &Path) -> Result<(), ReportError>;
}

/// Which save attempt produced the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    /// Rendered straight to the target path.
    Direct,
    /// Rendered to a temporary file, then copied into place.
    ViaTemp,
    /// Rebuilt without images after both full attempts failed.
    Degraded,
}

impl SaveOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SaveOutcome::Degraded)
    }
}

/// Expand tabs and drop carriage returns and other control characters so a
/// listing renders verbatim in any document format.
pub fn sanitize_listing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut col = 0;
        for ch in line.chars() {
            match ch {
                '\t' => {
                    let pad = TAB_WIDTH - col % TAB_WIDTH;
                    out.extend(std::iter::repeat_n(' ', pad));
                    col += pad;
                }
                c if c.is_control() => {}
                c => {
                    out.push(c);
                    col += 1;
                }
            }
        }
    }
    out
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// `<dir>/<stem>.temp.pdf`
pub fn temp_path(target: &Path) -> PathBuf {
    target.with_extension("temp.pdf")
}

/// `<dir>/<stem>_recovery.pdf`
pub fn recovery_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    target.with_file_name(format!("{stem}_recovery.pdf"))
}

/// Accumulates program records and serialises them once per run.
pub struct ReportBuilder {
    config: ReportConfig,
    renderer: Arc<dyn ReportRenderer>,
    records: Vec<ProgramRecord>,
    run_id: Option<String>,
    created_at: DateTime<Local>,
}

impl ReportBuilder {
    pub fn new(config: ReportConfig, renderer: Arc<dyn ReportRenderer>) -> Self {
        Self {
            config,
            renderer,
            records: Vec::new(),
            run_id: None,
            created_at: Local::now(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn add_program(&mut self, record: ProgramRecord) {
        debug!(program = %record.name, status = record.status_label(), "Report entry added");
        self.records.push(record);
    }

    pub fn records(&self) -> &[ProgramRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Build the document content. With `include_images` false every image
    /// becomes a placeholder.
    pub fn build_blocks(&self, include_images: bool) -> Vec<Block> {
        let mut blocks = self.cover();
        if self.records.is_empty() {
            blocks.push(Block::Paragraph("No programs were processed.".into()));
            return blocks;
        }
        match self.config.layout {
            ReportLayout::Interleaved => {
                for record in &self.records {
                    blocks.push(Block::Heading(format!("Program: {}", record.name)));
                    blocks.push(Block::Subheading("Source code".into()));
                    self.source_listing(record, &mut blocks);
                    blocks.push(Block::Subheading("Compilation and execution".into()));
                    self.result_section(record, include_images, &mut blocks);
                    blocks.push(Block::Subheading("Analysis".into()));
                    blocks.push(Block::Fields(analysis_fields(record)));
                    blocks.push(Block::PageBreak);
                }
            }
            ReportLayout::Grouped => {
                blocks.push(Block::Heading("Source code".into()));
                for record in &self.records {
                    blocks.push(Block::Subheading(record.name.clone()));
                    self.source_listing(record, &mut blocks);
                    blocks.push(Block::Spacer);
                }
                blocks.push(Block::PageBreak);

                blocks.push(Block::Heading("Execution results".into()));
                for record in &self.records {
                    blocks.push(Block::Subheading(record.name.clone()));
                    self.result_section(record, include_images, &mut blocks);
                    blocks.push(Block::Spacer);
                }
                blocks.push(Block::PageBreak);

                blocks.push(Block::Heading("Technical analysis".into()));
                for record in &self.records {
                    blocks.push(Block::Subheading(record.name.clone()));
                    blocks.push(Block::Fields(analysis_fields(record)));
                    blocks.push(Block::Spacer);
                }
            }
        }
        blocks
    }

    fn cover(&self) -> Vec<Block> {
        let succeeded = self.records.iter().filter(|r| r.succeeded()).count();
        let mut blocks = vec![Block::Title(self.config.title.clone())];
        if let Some(author) = &self.config.author {
            blocks.push(Block::Subtitle(format!("Prepared by {author}")));
        }
        blocks.push(Block::Spacer);
        blocks.push(Block::Subheading("About this report".into()));
        blocks.push(Block::Paragraph(INTRO.into()));
        blocks.push(Block::Spacer);

        let mut fields = vec![
            ("Programs".to_string(), self.records.len().to_string()),
            ("Succeeded".to_string(), succeeded.to_string()),
            (
                "Failed".to_string(),
                (self.records.len() - succeeded).to_string(),
            ),
            (
                "Generated".to_string(),
                self.created_at.format("%d/%m/%Y %H:%M:%S").to_string(),
            ),
        ];
        if let Some(run_id) = &self.run_id {
            fields.push(("Run".to_string(), run_id.clone()));
        }
        blocks.push(Block::Fields(fields));
        blocks.push(Block::PageBreak);
        blocks
    }

    fn source_listing(&self, record: &ProgramRecord, blocks: &mut Vec<Block>) {
        if record.source.is_empty() {
            blocks.push(Block::Placeholder("Source code not available.".into()));
        } else {
            blocks.push(Block::Code(sanitize_listing(&record.source)));
        }
    }

    fn result_section(&self, record: &ProgramRecord, include_images: bool, blocks: &mut Vec<Block>) {
        blocks.push(Block::Code(sanitize_listing(&record.details_text())));
        // compile failures and skipped files never ran, so there is nothing to show
        if record.execution().is_none() {
            return;
        }
        let image = match record.screenshot() {
            Some(path) if include_images && non_empty(path) => Block::Image {
                path: path.to_path_buf(),
                max_width_mm: self.config.max_image_width_mm,
            },
            Some(_) if !include_images => Block::Placeholder(SCREENSHOT_OMITTED.into()),
            Some(path) => {
                warn!(file = %path.display(), "Screenshot missing or empty at report time");
                Block::Placeholder(NO_SCREENSHOT.into())
            }
            None => Block::Placeholder(NO_SCREENSHOT.into()),
        };
        blocks.push(image);
    }

    /// Serialise the report to `target`.
    ///
    /// Attempts, in order: render in place; render to a temporary file and
    /// copy it over; rebuild without images and copy that over. Succeeds as
    /// soon as `target` holds a non-empty file.
    pub fn save(&self, target: &Path) -> Result<SaveOutcome, ReportError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let full = self.build_blocks(true);

        let last = match self.render_checked(&full, target) {
            Ok(()) => return Ok(self.saved(target, SaveOutcome::Direct)),
            Err(e) => e,
        };
        warn!(file = %target.display(), error = %last, "Report render failed, retrying via temporary file");

        let temp = temp_path(target);
        let last = match self.render_via(&full, &temp, target) {
            Ok(()) => return Ok(self.saved(target, SaveOutcome::ViaTemp)),
            Err(e) => e,
        };
        warn!(file = %target.display(), error = %last, "Report render failed again, retrying without images");

        let degraded = self.build_blocks(false);
        let recovery = recovery_path(target);
        match self.render_via(&degraded, &recovery, target) {
            Ok(()) => Ok(self.saved(target, SaveOutcome::Degraded)),
            Err(e) => Err(ReportError::AllAttemptsFailed {
                path: target.to_path_buf(),
                attempts: 3,
                last: e.to_string(),
            }),
        }
    }

    fn saved(&self, target: &Path, outcome: SaveOutcome) -> SaveOutcome {
        info!(
            file = %target.display(),
            programs = self.records.len(),
            renderer = self.renderer.name(),
            ?outcome,
            "Report saved"
        );
        outcome
    }

    fn render_checked(&self, blocks: &[Block], path: &Path) -> Result<(), ReportError> {
        self.renderer.render(blocks, path)?;
        if non_empty(path) {
            Ok(())
        } else {
            Err(ReportError::EmptyOutput {
                path: path.to_path_buf(),
            })
        }
    }

    /// Render to `staging`, copy into `target`, always remove `staging`.
    fn render_via(&self, blocks: &[Block], staging: &Path, target: &Path) -> Result<(), ReportError> {
        let result = self.render_checked(blocks, staging).and_then(|()| {
            std::fs::copy(staging, target)?;
            if non_empty(target) {
                Ok(())
            } else {
                Err(ReportError::EmptyOutput {
                    path: target.to_path_buf(),
                })
            }
        });
        if staging.exists() {
            if let Err(e) = std::fs::remove_file(staging) {
                debug!(file = %staging.display(), error = %e, "Staging file left behind");
            }
        }
        result
    }
}

fn analysis_fields(record: &ProgramRecord) -> Vec<(String, String)> {
    let class = &record.classification;
    let mut fields = vec![(
        "Category".to_string(),
        format!("{} ({})", class.category.title(), class.category.label()),
    )];
    if let Some(err) = &class.error {
        fields.push(("Classification note".to_string(), err.clone()));
    }
    fields.push(("Complexity".to_string(), format!("{}/100", class.complexity)));
    let groups: Vec<String> = class
        .matched_groups()
        .iter()
        .map(|c| c.label().to_string())
        .collect();
    fields.push(("Matched patterns".to_string(), list_or_none(&groups)));

    if let Some(unit) = &record.unit {
        fields.push(("Lines of code".to_string(), unit.lines_of_code.to_string()));
        fields.push(("Includes".to_string(), list_or_none(&unit.includes)));
        fields.push(("Functions".to_string(), list_or_none(&unit.functions)));
        fields.push(("Classes".to_string(), list_or_none(&unit.classes)));
        fields.push(("Has main".to_string(), yes_no(unit.has_main)));
        let input = if unit.requires_input && !unit.input_types.is_empty() {
            format!("yes ({})", unit.input_types.join(", "))
        } else {
            yes_no(unit.requires_input)
        };
        fields.push(("Reads input".to_string(), input));
    }

    if let Some(compile) = record.compile() {
        fields.push(("Compiler".to_string(), compile.invocation.program.clone()));
        fields.push(("Flags".to_string(), compile.invocation.flags.join(" ")));
        fields.push((
            "Compile time".to_string(),
            format!("{} ms", compile.elapsed.as_millis()),
        ));
    }
    if let Some(execution) = record.execution() {
        fields.push((
            "Waited".to_string(),
            format!("{:.1} s", execution.waited.as_secs_f64()),
        ));
    }
    fields.push((
        "Processed".to_string(),
        record.processed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ));
    fields.push(("Status".to_string(), record.status_label().to_string()));
    fields
}
