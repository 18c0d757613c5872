//! Terminal host for machines without an automatable terminal.
//!
//! Programs run as plain child processes with stdin closed and their output
//! redirected to the output artifact. There is no window, so every
//! screenshot fails and the report carries the no-screenshot placeholder.

use async_trait::async_trait;
use cppdoc_core::error::ExecutionError;
use cppdoc_core::terminal::{LaunchRequest, TerminalHost};
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

pub struct HeadlessHost {
    child: Mutex<Option<Child>>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self {
            child: Mutex::new(None),
        }
    }

    async fn spawn(&self, mut command: Command, output: &Path) -> Result<(), ExecutionError> {
        let launch_err = |e: std::io::Error| ExecutionError::Launch {
            message: e.to_string(),
        };
        let stdout = File::create(output).map_err(launch_err)?;
        let stderr = stdout.try_clone().map_err(launch_err)?;
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_err)?;
        debug!(pid = ?child.id(), "Headless program started");
        *self.child.lock().await = Some(child);
        Ok(())
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminalHost for HeadlessHost {
    fn name(&self) -> &str {
        "headless"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        self.spawn(Command::new(&request.executable), &request.output)
            .await
    }

    /// Run the launcher script through bash instead of the program itself.
    async fn launch_alternative(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        let mut command = Command::new("bash");
        command.arg(&request.script);
        self.spawn(command, &request.output).await
    }

    async fn is_busy(&self) -> Result<bool, ExecutionError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Headless program exited");
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(e) => Err(ExecutionError::Status {
                message: e.to_string(),
            }),
        }
    }

    async fn screenshot_window(&self, _target: &Path) -> Result<(), ExecutionError> {
        Err(ExecutionError::Capture {
            message: "headless host has no window to capture".to_string(),
        })
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if matches!(child.try_wait(), Ok(None)) {
            debug!("Killing headless program still running");
            child.kill().await.map_err(|e| ExecutionError::Close {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    fn program(dir: &Path, name: &str, body: &str) -> LaunchRequest {
        let executable = dir.join(name);
        std::fs::write(&executable, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();
        LaunchRequest {
            script: dir.join(format!("run_{name}.sh")),
            executable,
            output: dir.join(format!("{name}_output.txt")),
            label: name.to_string(),
        }
    }

    async fn wait_idle(host: &HeadlessHost) {
        for _ in 0..200 {
            if !host.is_busy().await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("program never finished");
    }

    #[tokio::test]
    async fn test_output_is_redirected_to_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let host = HeadlessHost::new();
        let req = program(dir.path(), "hello", "echo Hello\necho oops >&2");
        host.launch(&req).await.unwrap();
        wait_idle(&host).await;
        host.close().await.unwrap();
        let output = std::fs::read_to_string(&req.output).unwrap();
        assert!(output.contains("Hello"));
        assert!(output.contains("oops"));
    }

    #[tokio::test]
    async fn test_stdin_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let host = HeadlessHost::new();
        let req = program(dir.path(), "reader", "read x || echo eof");
        host.launch(&req).await.unwrap();
        wait_idle(&host).await;
        assert_eq!(std::fs::read_to_string(&req.output).unwrap().trim(), "eof");
    }

    #[tokio::test]
    async fn test_close_kills_running_program() {
        let dir = tempfile::tempdir().unwrap();
        let host = HeadlessHost::new();
        let req = program(dir.path(), "sleeper", "sleep 30");
        host.launch(&req).await.unwrap();
        assert!(host.is_busy().await.unwrap());
        host.close().await.unwrap();
        assert!(!host.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let host = HeadlessHost::new();
        let req = LaunchRequest {
            script: dir.path().join("run_gone.sh"),
            executable: PathBuf::from("/nonexistent/gone"),
            output: dir.path().join("gone_output.txt"),
            label: "gone".into(),
        };
        assert!(matches!(
            host.launch(&req).await,
            Err(ExecutionError::Launch { .. })
        ));
    }

    #[tokio::test]
    async fn test_screenshot_always_fails() {
        let host = HeadlessHost::new();
        assert!(matches!(
            host.screenshot_window(Path::new("/tmp/x.jpg")).await,
            Err(ExecutionError::Capture { .. })
        ));
        assert!(host.is_available().await);
    }
}
