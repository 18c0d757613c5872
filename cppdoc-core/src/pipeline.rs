//! The pipeline driver.
//!
//! Files are processed strictly one after another: classify, compile, run
//! and capture, then add the record to the report. Per-file failures become
//! records and never stop the batch. At the end the report is saved once and
//! the scratch directory is cleaned.
//!
//! Two cancellation tokens are honoured. The batch token stops the driver
//! before the next file starts; the shutdown token additionally abandons a
//! wait in progress.

use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::{CleanupReport, ScratchDir, SessionArtifacts};
use crate::classifier::Classifier;
use crate::compiler::CompilerInvoker;
use crate::config::AppConfig;
use crate::discovery::Candidate;
use crate::envcheck::{EnvReport, check_environment};
use crate::orchestrator::Orchestrator;
use crate::report::{ReportBuilder, ReportRenderer};
use crate::terminal::TerminalHost;
use crate::types::{
    ClassificationResult, LineItem, ProgramRecord, RecordOutcome, RunSummary, SourceUnit,
    file_stem,
};

/// Longest compiler stderr excerpt shown on a compile-only line item.
pub const STDERR_EXCERPT_CHARS: usize = 500;

/// First `STDERR_EXCERPT_CHARS` characters of `stderr`, marked when cut.
pub fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    match trimmed.char_indices().nth(STDERR_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Progress notifications, e.g. for console line items.
pub trait PipelineObserver: Send + Sync {
    fn file_started(&self, _index: usize, _total: usize, _path: &Path) {}

    fn file_finished(&self, _record: &ProgramRecord) {}
}

/// Observer that ignores everything.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Also delete this run's artifacts during the final cleanup.
    pub discard_current: bool,
}

/// Sequences classification, compilation, execution and reporting.
pub struct Pipeline {
    config: AppConfig,
    scratch: ScratchDir,
    classifier: Classifier,
    compiler: CompilerInvoker,
    orchestrator: Orchestrator,
    renderer: Arc<dyn ReportRenderer>,
    observer: Arc<dyn PipelineObserver>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        host: Arc<dyn TerminalHost>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let scratch = ScratchDir::new(&config.paths.scratch_dir);
        let compiler = CompilerInvoker::new(config.compiler.clone(), scratch.clone());
        let orchestrator = Orchestrator::new(
            host,
            scratch.clone(),
            config.execution.clone(),
            config.capture.clone(),
        );
        let classifier = Classifier::new();
        for err in classifier.rule_errors() {
            warn!(error = %err, "Classifier rule skipped");
        }
        Self {
            config,
            scratch,
            classifier,
            compiler,
            orchestrator,
            renderer,
            observer: Arc::new(NoOpObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// `batch` stops the run before the next file; `shutdown` also abandons
    /// the wait of the file in flight.
    pub fn with_cancellation(mut self, batch: CancellationToken, shutdown: CancellationToken) -> Self {
        self.cancel = batch;
        self.orchestrator = self.orchestrator.with_shutdown(shutdown);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub async fn check_environment(&self) -> EnvReport {
        check_environment(
            &self.compiler,
            self.orchestrator.host().as_ref(),
            &self.config.paths.output_dir,
            self.scratch.root(),
        )
        .await
    }

    /// Process one input into a record. Never fails.
    pub async fn process(
        &self,
        candidate: &Candidate,
        session: &mut SessionArtifacts,
        execute: bool,
    ) -> ProgramRecord {
        match candidate {
            Candidate::Rejected { path, reason } => skipped(path, reason.clone()),
            Candidate::Source(path) => self.process_file(path, session, execute).await,
        }
    }

    /// Classify, compile and, when `execute` is set and the build succeeded,
    /// run the program.
    pub async fn process_file(
        &self,
        path: &Path,
        session: &mut SessionArtifacts,
        execute: bool,
    ) -> ProgramRecord {
        let name = file_stem(path);
        let key = session.claim(&name);
        if key != name {
            debug!(file = %path.display(), %key, "Stem already used in this run, artifacts renamed");
        }

        let (unit, classification) = match SourceUnit::read(path) {
            Ok(unit) => {
                let classification = self.classifier.classify_unit(&unit);
                (Some(unit), classification)
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Source not readable, classification skipped");
                (None, ClassificationResult::failed(e.to_string()))
            }
        };
        info!(
            file = %path.display(),
            category = %classification.category,
            complexity = classification.complexity,
            "Classified"
        );

        let compile = self.compiler.compile_as(path, &key).await;
        let outcome = match compile.executable.clone() {
            Some(executable) if compile.success && execute => {
                let execution = self.orchestrator.run(&executable).await;
                if execution.success {
                    RecordOutcome::Executed { compile, execution }
                } else {
                    RecordOutcome::ExecutionFailed { compile, execution }
                }
            }
            Some(_) if compile.success => RecordOutcome::Compiled { compile },
            _ => RecordOutcome::CompileFailed { compile },
        };

        ProgramRecord {
            name,
            path: path.to_path_buf(),
            source: unit.as_ref().map(|u| u.content.clone()).unwrap_or_default(),
            unit,
            classification,
            outcome,
            processed_at: Local::now(),
        }
    }

    /// Process every candidate, save the report and clean the scratch
    /// directory.
    pub async fn run(&self, candidates: &[Candidate], options: &RunOptions) -> RunSummary {
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, files = candidates.len(), "Run started");

        let mut builder =
            ReportBuilder::new(self.config.report.clone(), self.renderer.clone()).with_run_id(&run_id);
        let mut session = SessionArtifacts::new();
        let (items, cancelled) = self
            .each(candidates, true, &mut session, |record| builder.add_program(record))
            .await;

        let target = self.config.report_path();
        let report_saved = match builder.save(&target) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Report not saved");
                false
            }
        };

        if let Err(e) = self.scratch.record_session(&session) {
            warn!(error = %e, "Session manifest not written");
        }
        let keep = (!options.discard_current).then_some(&session);
        self.scratch.cleanup(keep);

        let success = report_saved && !cancelled && items.iter().all(|i| i.succeeded);
        info!(%run_id, success, "Run finished");
        RunSummary {
            run_id,
            items,
            report_path: Some(target),
            report_saved,
            cancelled,
            success,
        }
    }

    /// Compile every candidate without running anything or writing a report.
    pub async fn compile_only(&self, candidates: &[Candidate]) -> RunSummary {
        let run_id = Uuid::new_v4().to_string();
        let mut session = SessionArtifacts::new();
        let (items, cancelled) = self.each(candidates, false, &mut session, |_| {}).await;
        let success = !cancelled && items.iter().all(|i| i.succeeded);
        RunSummary {
            run_id,
            items,
            report_path: None,
            report_saved: false,
            cancelled,
            success,
        }
    }

    /// Delete scratch artifacts, keeping the most recent run's when asked.
    pub fn cleanup(&self, keep_current: bool) -> CleanupReport {
        let session = keep_current.then(|| self.scratch.last_session());
        self.scratch.cleanup(session.as_ref())
    }

    async fn each(
        &self,
        candidates: &[Candidate],
        execute: bool,
        session: &mut SessionArtifacts,
        mut sink: impl FnMut(ProgramRecord),
    ) -> (Vec<LineItem>, bool) {
        let mut items = Vec::with_capacity(candidates.len());
        let mut cancelled = false;
        for (index, candidate) in candidates.iter().enumerate() {
            let record = if self.cancel.is_cancelled() {
                if !cancelled {
                    warn!(remaining = candidates.len() - index, "Batch cancelled");
                    cancelled = true;
                }
                skipped(candidate.path(), "cancelled before start".to_string())
            } else {
                self.observer
                    .file_started(index, candidates.len(), candidate.path());
                self.process(candidate, session, execute).await
            };
            self.observer.file_finished(&record);
            items.push(LineItem::from(&record));
            sink(record);
        }
        (items, cancelled)
    }
}

fn skipped(path: &Path, reason: String) -> ProgramRecord {
    ProgramRecord {
        name: file_stem(path),
        path: path.to_path_buf(),
        source: String::new(),
        unit: None,
        classification: ClassificationResult::default(),
        outcome: RecordOutcome::Skipped { reason },
        processed_at: Local::now(),
    }
}
