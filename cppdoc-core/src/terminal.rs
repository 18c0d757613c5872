//! Terminal host capability interface.
//!
//! A terminal host runs a launcher script in a new interactive session,
//! reports whether that session is still busy, screenshots its window and
//! closes it. Concrete adapters live in `cppdoc-tools`; [`ScriptedHost`] is a
//! programmable stand-in for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::ExecutionError;

/// Lock a test double's state. A panic in another test thread leaves the
/// data usable, so poisoning is ignored.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a host needs to start one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Launcher script to run in the new session.
    pub script: PathBuf,
    /// The compiled program the script runs.
    pub executable: PathBuf,
    /// Best-effort output artifact; hosts that can capture stdout write here.
    pub output: PathBuf,
    /// Stem of the source file, used in titles and logs.
    pub label: String,
}

/// Automation surface of an OS terminal application.
#[async_trait]
pub trait TerminalHost: Send + Sync {
    /// Host name for logging.
    fn name(&self) -> &str;

    /// Whether the host can be driven on this machine.
    async fn is_available(&self) -> bool;

    /// Open a new session running `request.script`.
    async fn launch(&self, request: &LaunchRequest) -> Result<(), ExecutionError>;

    /// Second launch strategy, tried once after `launch` fails.
    async fn launch_alternative(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        self.launch(request).await
    }

    /// Whether the session still has a running foreground process.
    async fn is_busy(&self) -> Result<bool, ExecutionError>;

    /// Write a screenshot of the session window to `target`.
    async fn screenshot_window(&self, target: &Path) -> Result<(), ExecutionError>;

    /// Close the session window.
    async fn close(&self) -> Result<(), ExecutionError>;
}

/// Quote a path for a POSIX shell.
pub fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Render the launcher script: banner, program, then a pause until Enter.
pub fn launcher_script(request: &LaunchRequest) -> String {
    let rule = "=".repeat(50);
    let name = request
        .executable
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.label.clone());
    format!(
        "#!/bin/bash\n\
         clear 2>/dev/null || true\n\
         echo \"{rule}\"\n\
         echo \"Running: {name}\"\n\
         echo \"{rule}\"\n\
         echo \"\"\n\
         {exe}\n\
         echo \"\"\n\
         echo \"{rule}\"\n\
         echo \"Execution finished\"\n\
         echo \"Press Enter to continue...\"\n\
         read\n",
        exe = shell_quote(&request.executable),
    )
}

/// Write the launcher script and mark it executable.
pub fn write_launcher_script(request: &LaunchRequest) -> Result<(), ExecutionError> {
    let script_err = |e: std::io::Error| ExecutionError::Script {
        path: request.script.clone(),
        message: e.to_string(),
    };
    if let Some(parent) = request.script.parent() {
        std::fs::create_dir_all(parent).map_err(script_err)?;
    }
    std::fs::write(&request.script, launcher_script(request)).map_err(script_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&request.script, std::fs::Permissions::from_mode(0o755))
            .map_err(script_err)?;
    }
    debug!(script = %request.script.display(), "Launcher script written");
    Ok(())
}

/// A host call recorded by [`ScriptedHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Launch(PathBuf),
    LaunchAlternative(PathBuf),
    IsBusy,
    Screenshot(PathBuf),
    Close,
}

/// A terminal host driven by queued answers.
///
/// Defaults: launches succeed, the session is idle on the first query, every
/// capture writes a small non-empty file and close succeeds. An empty answer
/// queue falls back to the default.
pub struct ScriptedHost {
    available: bool,
    launches: Mutex<VecDeque<Result<(), ExecutionError>>>,
    busy: Mutex<VecDeque<Result<bool, ExecutionError>>>,
    captures: Mutex<VecDeque<Result<(), ExecutionError>>>,
    capture_bytes: Vec<u8>,
    close_error: Option<ExecutionError>,
    program_output: Option<String>,
    calls: Mutex<Vec<HostCall>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            available: true,
            launches: Mutex::new(VecDeque::new()),
            busy: Mutex::new(VecDeque::new()),
            captures: Mutex::new(VecDeque::new()),
            capture_bytes: b"scripted capture".to_vec(),
            close_error: None,
            program_output: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Answers for successive `launch` / `launch_alternative` calls.
    pub fn with_launches(self, answers: Vec<Result<(), ExecutionError>>) -> Self {
        *locked(&self.launches) = answers.into();
        self
    }

    /// Answers for successive busy queries.
    pub fn with_busy(self, answers: Vec<Result<bool, ExecutionError>>) -> Self {
        *locked(&self.busy) = answers.into();
        self
    }

    /// Report busy on every query.
    pub fn always_busy(self) -> Self {
        let answers = std::iter::repeat_n(Ok(true), 100_000).collect();
        self.with_busy(answers)
    }

    /// Answers for successive capture attempts.
    pub fn with_captures(self, answers: Vec<Result<(), ExecutionError>>) -> Self {
        *locked(&self.captures) = answers.into();
        self
    }

    /// Fail every capture attempt.
    pub fn failing_capture(self) -> Self {
        let answers = std::iter::repeat_n(
            Err(ExecutionError::Capture {
                message: "window not found".into(),
            }),
            64,
        )
        .collect();
        self.with_captures(answers)
    }

    /// Bytes written by a successful capture; empty bytes simulate a capture
    /// tool that reports success without producing an image.
    pub fn with_capture_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.capture_bytes = bytes;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.close_error = Some(ExecutionError::Close {
            message: "no such window".into(),
        });
        self
    }

    /// Text the "program" writes to the output artifact on launch.
    pub fn with_program_output(mut self, text: impl Into<String>) -> Self {
        self.program_output = Some(text.into());
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        locked(&self.calls).clone()
    }

    pub fn count(&self, matches: impl Fn(&HostCall) -> bool) -> usize {
        locked(&self.calls).iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: HostCall) {
        locked(&self.calls).push(call);
    }

    fn next_launch(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        let answer = locked(&self.launches).pop_front().unwrap_or(Ok(()));
        if answer.is_ok() {
            if let Some(text) = &self.program_output {
                std::fs::write(&request.output, text).map_err(|e| ExecutionError::Launch {
                    message: e.to_string(),
                })?;
            }
        }
        answer
    }
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminalHost for ScriptedHost {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        self.record(HostCall::Launch(request.script.clone()));
        self.next_launch(request)
    }

    async fn launch_alternative(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        self.record(HostCall::LaunchAlternative(request.script.clone()));
        self.next_launch(request)
    }

    async fn is_busy(&self) -> Result<bool, ExecutionError> {
        self.record(HostCall::IsBusy);
        locked(&self.busy).pop_front().unwrap_or(Ok(false))
    }

    async fn screenshot_window(&self, target: &Path) -> Result<(), ExecutionError> {
        self.record(HostCall::Screenshot(target.to_path_buf()));
        let answer = locked(&self.captures).pop_front().unwrap_or(Ok(()));
        answer?;
        std::fs::write(target, &self.capture_bytes).map_err(|e| ExecutionError::Capture {
            message: e.to_string(),
        })
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        self.record(HostCall::Close);
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_host_survives_poisoned_lock() {
        let host = std::sync::Arc::new(ScriptedHost::new());
        let poisoner = host.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.calls.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(host.calls.is_poisoned());
        assert!(host.calls().is_empty());
    }

    fn request(dir: &Path) -> LaunchRequest {
        LaunchRequest {
            script: dir.join("run_ej1.sh"),
            executable: dir.join("ej1"),
            output: dir.join("ej1_output.txt"),
            label: "ej1".into(),
        }
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote(Path::new("/tmp/a b")), "'/tmp/a b'");
        assert_eq!(shell_quote(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
    }

    #[test]
    fn test_launcher_script_runs_program_and_pauses() {
        let script = launcher_script(&request(Path::new("/scratch")));
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("echo \"Running: ej1\""));
        assert!(script.contains("\n'/scratch/ej1'\n"));
        assert!(script.trim_end().ends_with("read"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_launcher_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let req = request(&dir.path().join("scratch"));
        write_launcher_script(&req).unwrap();
        let mode = std::fs::metadata(&req.script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_scripted_host_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new().with_program_output("42\n");
        let req = request(dir.path());
        host.launch(&req).await.unwrap();
        assert!(!host.is_busy().await.unwrap());
        let shot = dir.path().join("shot.jpg");
        host.screenshot_window(&shot).await.unwrap();
        host.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(&req.output).unwrap(), "42\n");
        assert!(std::fs::metadata(&shot).unwrap().len() > 0);
        assert_eq!(
            host.calls(),
            vec![
                HostCall::Launch(req.script.clone()),
                HostCall::IsBusy,
                HostCall::Screenshot(shot),
                HostCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_host_queued_failures() {
        let dir = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new()
            .with_launches(vec![Err(ExecutionError::Launch {
                message: "denied".into(),
            })])
            .failing_capture()
            .failing_close();
        assert!(host.launch(&request(dir.path())).await.is_err());
        assert!(host.launch_alternative(&request(dir.path())).await.is_ok());
        assert!(host.screenshot_window(&dir.path().join("x.jpg")).await.is_err());
        assert!(host.close().await.is_err());
    }
}
