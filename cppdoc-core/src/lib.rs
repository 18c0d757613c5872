//! # cppdoc Core
//!
//! Core library for cppdoc, a batch tool that compiles C++ exercises, runs
//! each program in a terminal window, captures a screenshot and assembles a
//! report. Provides configuration, the classifier, the compiler invoker, the
//! execution / capture orchestrator, the report builder and the pipeline
//! driver. Terminal and document back ends plug in through
//! [`TerminalHost`] and [`ReportRenderer`].

pub mod artifacts;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod discovery;
pub mod envcheck;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod terminal;
pub mod types;

// Re-export commonly used types at the crate root.
pub use artifacts::{CleanupReport, ScratchDir, SessionArtifacts};
pub use classifier::Classifier;
pub use compiler::CompilerInvoker;
pub use config::{
    AppConfig, CaptureConfig, CaptureFormat, CompilerConfig, ExecutionConfig, ReportConfig,
    ReportLayout, config_exists, load_config, load_config_file, write_default_config,
};
pub use discovery::{Candidate, DiscoveryOptions, discover};
pub use envcheck::{CheckItem, EnvReport};
pub use error::{
    CleanupError, ClassifyError, CompileError, ConfigError, CppdocError, ExecutionError,
    ReportError, Result,
};
pub use orchestrator::Orchestrator;
pub use pipeline::{NoOpObserver, Pipeline, PipelineObserver, RunOptions};
pub use report::{Block, RecordingRenderer, ReportBuilder, ReportRenderer, SaveOutcome};
pub use terminal::{LaunchRequest, ScriptedHost, TerminalHost};
pub use types::{
    ClassificationResult, CompileOutcome, ExecutionOutcome, ExecutionPhase, ExerciseCategory,
    LineItem, ProgramRecord, RecordOutcome, RunSummary, SourceUnit,
};
