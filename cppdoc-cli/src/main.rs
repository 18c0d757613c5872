//! cppdoc CLI: compile C++ exercises, run them in a terminal, capture the
//! window and assemble everything into a PDF report.

mod commands;
mod console;

use clap::Parser;
use cppdoc_core::config::ReportLayout;
use cppdoc_core::discovery::{DEFAULT_PATTERN, DiscoveryOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// cppdoc: compile, run and document C++ exercises
#[derive(Parser, Debug)]
#[command(name = "cppdoc", version, about, long_about = None)]
struct Cli {
    /// Source files or directories to process
    inputs: Vec<PathBuf>,

    /// Delete scratch artifacts and exit
    #[arg(long)]
    clean_temp: bool,

    /// With --clean-temp, keep the artifacts of the most recent run
    #[arg(long, requires = "clean_temp")]
    keep_current: bool,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    run: RunArgs,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by `run` and `compile`.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct RunArgs {
    /// Never prompt; abort instead of asking
    #[arg(long, global = true)]
    pub console: bool,

    /// Skip the compiler / terminal / directory checks
    #[arg(long, global = true)]
    pub skip_checks: bool,

    /// Also delete this run's scratch artifacts when it finishes
    #[arg(long, global = true)]
    pub discard_current: bool,

    /// Glob used when expanding directory inputs
    #[arg(long, global = true, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Search directory inputs recursively
    #[arg(short, long, global = true)]
    pub recursive: bool,

    /// Report layout: interleaved or grouped
    #[arg(long, global = true)]
    pub layout: Option<ReportLayout>,

    /// Report file, or the directory to write it into
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Compiler executable
    #[arg(long, global = true)]
    pub compiler: Option<String>,

    /// Compiler flags, whitespace separated (e.g. "-O2 -std=c++17")
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub flags: Option<String>,

    /// Compiler timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Longest wait for a program to finish, in seconds
    #[arg(long, global = true)]
    pub max_wait: Option<u64>,

    /// Print the run summary as JSON instead of line items
    #[arg(long, global = true)]
    pub json: bool,
}

impl RunArgs {
    pub fn discovery(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            pattern: self.pattern.clone(),
            recursive: self.recursive,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Compile, run, capture and build the report (default)
    Run {
        /// Source files or directories to process
        inputs: Vec<PathBuf>,
    },
    /// Compile only, without running programs or writing a report
    Compile {
        /// Source files or directories to compile
        inputs: Vec<PathBuf>,
    },
    /// Delete scratch artifacts
    Clean {
        /// Keep the artifacts of the most recent run
        #[arg(long)]
        keep_current: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "cppdoc", "cppdoc")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cppdoc.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(Commands::Config { action }) = &cli.command {
        commands::handle_config(action, &workspace).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = commands::load_config(&workspace, cli.config.as_deref(), &cli.run)?;

    let success = match cli.command {
        _ if cli.clean_temp => commands::clean(config, cli.keep_current, &cli.run)?,
        Some(Commands::Clean { keep_current }) => commands::clean(config, keep_current, &cli.run)?,
        Some(Commands::Compile { inputs }) => commands::compile(config, inputs, &cli.run).await?,
        Some(Commands::Run { inputs }) => commands::run(config, inputs, &cli.run).await?,
        Some(Commands::Config { .. }) => true,
        None => commands::run(config, cli.inputs, &cli.run).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
