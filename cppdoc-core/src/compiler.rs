//! Native compiler invocation.
//!
//! One attempt per call. The child is spawned with `kill_on_drop`, so when
//! the wall-clock timeout elapses dropping the pending future terminates it.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::artifacts::ScratchDir;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::types::{CompileOutcome, CompilerInvocation, file_stem};

/// Runs the configured compiler against single source files.
#[derive(Debug, Clone)]
pub struct CompilerInvoker {
    config: CompilerConfig,
    scratch: ScratchDir,
}

impl CompilerInvoker {
    pub fn new(config: CompilerConfig, scratch: ScratchDir) -> Self {
        Self { config, scratch }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `source` into the scratch directory, named after its stem.
    pub async fn compile(&self, source: &Path) -> CompileOutcome {
        self.compile_as(source, &file_stem(source)).await
    }

    /// Compile `source` into the scratch executable for artifact `key`.
    pub async fn compile_as(&self, source: &Path, key: &str) -> CompileOutcome {
        let started = Instant::now();
        let output = self.scratch.executable_path(key);
        let invocation = CompilerInvocation {
            program: self.config.program.clone(),
            flags: self.config.flags.clone(),
            timeout_secs: self.config.timeout_secs,
            source: source.to_path_buf(),
            output: output.clone(),
        };

        let failed = |failure: CompileError, stdout: String, stderr: String| CompileOutcome {
            success: false,
            executable: None,
            stdout,
            stderr,
            invocation: invocation.clone(),
            failure: Some(failure),
            elapsed: started.elapsed(),
        };

        if let Err(e) = self.scratch.ensure() {
            return failed(
                CompileError::Scratch {
                    path: self.scratch.root().to_path_buf(),
                    message: e.to_string(),
                },
                String::new(),
                String::new(),
            );
        }

        info!(file = %source.display(), command = %invocation.command_line(), "Compiling");

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.flags)
            .arg(source)
            .arg("-o")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.config.program, error = %e, "Compiler could not be started");
                return failed(
                    CompileError::Spawn {
                        program: self.config.program.clone(),
                        message: e.to_string(),
                    },
                    String::new(),
                    String::new(),
                );
            }
        };

        let result = tokio::time::timeout(self.config.timeout(), child.wait_with_output()).await;
        let output_data = match result {
            Err(_) => {
                warn!(
                    file = %source.display(),
                    timeout_secs = self.config.timeout_secs,
                    "Compilation timed out, compiler killed"
                );
                return failed(
                    CompileError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    },
                    String::new(),
                    String::new(),
                );
            }
            Ok(Err(e)) => {
                return failed(
                    CompileError::Spawn {
                        program: self.config.program.clone(),
                        message: format!("failed to wait for compiler: {e}"),
                    },
                    String::new(),
                    String::new(),
                );
            }
            Ok(Ok(out)) => out,
        };

        let stdout = String::from_utf8_lossy(&output_data.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output_data.stderr).into_owned();

        if output_data.status.success() {
            debug!(executable = %output.display(), "Compilation succeeded");
            CompileOutcome {
                success: true,
                executable: Some(output),
                stdout,
                stderr,
                invocation: invocation.clone(),
                failure: None,
                elapsed: started.elapsed(),
            }
        } else {
            let exit_code = output_data.status.code();
            warn!(file = %source.display(), ?exit_code, "Compilation failed");
            failed(CompileError::CompilerFailed { exit_code }, stdout, stderr)
        }
    }

    /// Check that the compiler can be started (`<program> --version`).
    pub async fn probe(&self) -> Result<String, CompileError> {
        let run = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.config.timeout(), run).await {
            Err(_) => Err(CompileError::Timeout {
                timeout_secs: self.config.timeout_secs,
            }),
            Ok(Err(e)) => Err(CompileError::Spawn {
                program: self.config.program.clone(),
                message: e.to_string(),
            }),
            Ok(Ok(out)) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()),
            Ok(Ok(out)) => Err(CompileError::CompilerFailed {
                exit_code: out.status.code(),
            }),
        }
    }
}
