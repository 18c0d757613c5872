//! CLI subcommand handlers.

use crate::ConfigAction;
use crate::RunArgs;
use crate::console::{self, ConsoleObserver};
use cppdoc_core::config::{AppConfig, workspace_config_path};
use cppdoc_core::discovery::discover;
use cppdoc_core::{Pipeline, RunOptions, RunSummary, write_default_config};
use cppdoc_tools::{PdfRenderer, default_host};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn handle_config(action: &ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = write_default_config(workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = cppdoc_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Load layered configuration, apply command line overrides and resolve
/// paths against the workspace.
pub fn load_config(
    workspace: &Path,
    file: Option<&Path>,
    args: &RunArgs,
) -> anyhow::Result<AppConfig> {
    let mut config = match file {
        Some(path) => cppdoc_core::load_config_file(path)?,
        None => cppdoc_core::load_config(Some(workspace), None)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
    };
    apply_overrides(&mut config, args);
    let config = config.resolve_paths(workspace);
    config.validate_in(workspace)?;
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(compiler) = &args.compiler {
        config.compiler.program = compiler.clone();
    }
    if let Some(flags) = &args.flags {
        config.compiler.flags = flags.split_whitespace().map(String::from).collect();
    }
    if let Some(timeout) = args.timeout {
        config.compiler.timeout_secs = timeout;
    }
    if let Some(max_wait) = args.max_wait {
        config.execution.max_wait_secs = max_wait;
    }
    if let Some(layout) = args.layout {
        config.report.layout = layout;
    }
    if let Some(output) = &args.output {
        let is_pdf = output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        match output.file_name() {
            Some(name) if is_pdf => {
                config.report.file_name = name.to_string_lossy().into_owned();
                config.paths.output_dir = output
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
            }
            _ => config.paths.output_dir = output.clone(),
        }
    }
}

/// Batch token on the first Ctrl-C, shutdown token on the second.
fn interrupt_tokens() -> (CancellationToken, CancellationToken) {
    let batch = CancellationToken::new();
    let shutdown = CancellationToken::new();
    let (b, s) = (batch.clone(), shutdown.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, stopping after the current file");
        b.cancel();
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Second interrupt, abandoning the current program");
        s.cancel();
    });
    (batch, shutdown)
}

fn pipeline(config: AppConfig, args: &RunArgs, show_stderr: bool) -> Pipeline {
    let host = default_host(&config.capture);
    let renderer = Arc::new(PdfRenderer::new(config.report.clone()));
    let (batch, shutdown) = interrupt_tokens();
    let pipeline = Pipeline::new(config, host, renderer).with_cancellation(batch, shutdown);
    if args.json {
        pipeline
    } else {
        pipeline.with_observer(Arc::new(ConsoleObserver::new(show_stderr)))
    }
}

fn report(summary: &RunSummary, args: &RunArgs) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        console::print_summary(summary);
    }
    Ok(())
}

/// The default action. Returns whether every file and the report succeeded.
pub async fn run(config: AppConfig, inputs: Vec<PathBuf>, args: &RunArgs) -> anyhow::Result<bool> {
    let interactive = !args.console && std::io::stdin().is_terminal();
    let inputs = if inputs.is_empty() && interactive {
        console::prompt_for_source()?.into_iter().collect()
    } else {
        inputs
    };
    if inputs.is_empty() {
        eprintln!("Error: no files were specified");
        return Ok(false);
    }

    let candidates = discover(&inputs, &args.discovery())?;
    let pipeline = pipeline(config, args, false);

    if !args.skip_checks {
        let env = pipeline.check_environment().await;
        if !env.all_ok() {
            console::print_env_failures(&env);
            if !interactive || !console::confirm_continue()? {
                eprintln!("Operation cancelled.");
                return Ok(false);
            }
        }
    }

    let options = RunOptions {
        discard_current: args.discard_current,
    };
    let summary = pipeline.run(&candidates, &options).await;
    report(&summary, args)?;
    Ok(summary.success)
}

/// Compile every input without running it.
pub async fn compile(config: AppConfig, inputs: Vec<PathBuf>, args: &RunArgs) -> anyhow::Result<bool> {
    if inputs.is_empty() {
        eprintln!("Error: no files were specified");
        return Ok(false);
    }
    let candidates = discover(&inputs, &args.discovery())?;
    let summary = pipeline(config, args, true).compile_only(&candidates).await;
    report(&summary, args)?;
    Ok(summary.success)
}

/// Delete scratch artifacts, optionally keeping the last run's.
pub fn clean(config: AppConfig, keep_current: bool, args: &RunArgs) -> anyhow::Result<bool> {
    if !args.json {
        println!("Cleaning temporary files...");
    }
    let host = default_host(&config.capture);
    let renderer = Arc::new(PdfRenderer::new(config.report.clone()));
    let cleanup = Pipeline::new(config, host, renderer).cleanup(keep_current);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&cleanup)?);
    } else {
        console::print_cleanup(&cleanup);
    }
    Ok(cleanup.failed.is_empty())
}
