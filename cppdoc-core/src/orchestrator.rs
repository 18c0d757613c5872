//! Execution / capture orchestrator.
//!
//! Drives one compiled program through a terminal host:
//!
//! ```text
//! Preparing -> Launching -> Waiting -> Capturing -> Closing -> Done
//!      \___________\___________\_____________________________-> Failed
//! ```
//!
//! Only a failure to prepare the launcher or to start the terminal is fatal.
//! An exhausted wait, failed captures and a failed close are recorded on the
//! outcome and the run still counts as executed.
//!
//! All sleeps go through `tokio::time`, so tests run on a paused clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::ScratchDir;
use crate::config::{CaptureConfig, ExecutionConfig};
use crate::error::ExecutionError;
use crate::terminal::{LaunchRequest, TerminalHost, write_launcher_script};
use crate::types::{ExecutionOutcome, ExecutionPhase};

/// How the WAITING phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitEnd {
    Idle,
    Exhausted,
    Abandoned,
}

/// Runs compiled programs in a terminal session and captures the result.
pub struct Orchestrator {
    host: Arc<dyn TerminalHost>,
    scratch: ScratchDir,
    execution: ExecutionConfig,
    capture: CaptureConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        host: Arc<dyn TerminalHost>,
        scratch: ScratchDir,
        execution: ExecutionConfig,
        capture: CaptureConfig,
    ) -> Self {
        Self {
            host,
            scratch,
            execution,
            capture,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abandon any wait in progress when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn host(&self) -> &Arc<dyn TerminalHost> {
        &self.host
    }

    /// Run `executable` to completion. Never returns an error: every problem
    /// ends up on the outcome.
    pub async fn run(&self, executable: &Path) -> ExecutionOutcome {
        let stem = ScratchDir::artifact_key(executable);
        let mut run = Run::new();
        info!(program = %stem, host = self.host.name(), "Executing in terminal");

        run.enter(ExecutionPhase::Preparing);
        let request = LaunchRequest {
            script: self.scratch.launcher_path(&stem),
            executable: executable.to_path_buf(),
            output: self.scratch.output_path(&stem),
            label: stem.clone(),
        };
        // a leftover artifact from an earlier run must not pass as this run's output
        remove_stale(&request.output).await;
        if let Err(e) = write_launcher_script(&request) {
            return run.fail(e);
        }

        run.enter(ExecutionPhase::Launching);
        if let Err(first) = self.host.launch(&request).await {
            warn!(program = %stem, error = %first, "Terminal launch failed, trying alternative");
            if let Err(second) = self.host.launch_alternative(&request).await {
                let err = match second {
                    ExecutionError::Launch { .. } => second,
                    other => ExecutionError::Launch {
                        message: other.to_string(),
                    },
                };
                warn!(program = %stem, error = %err, "Alternative launch failed");
                return run.fail(err);
            }
        }

        run.enter(ExecutionPhase::Waiting);
        let started = Instant::now();
        let end = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => WaitEnd::Abandoned,
            exhausted = self.poll_until_idle() => {
                if exhausted { WaitEnd::Exhausted } else { WaitEnd::Idle }
            }
        };
        run.waited = started.elapsed();
        match end {
            WaitEnd::Idle => debug!(program = %stem, waited_ms = run.waited.as_millis() as u64, "Program finished"),
            WaitEnd::Exhausted => {
                warn!(program = %stem, max_wait_secs = self.execution.max_wait_secs, "Program still running after maximum wait, continuing");
                run.wait_exhausted = true;
            }
            WaitEnd::Abandoned => {
                warn!(program = %stem, "Wait abandoned on shutdown");
                run.wait_abandoned = true;
            }
        }

        let mut screenshot = None;
        if end != WaitEnd::Abandoned {
            run.enter(ExecutionPhase::Capturing);
            screenshot = self.capture_with_retry(&stem, &mut run).await;
        }

        run.enter(ExecutionPhase::Closing);
        if let Err(e) = self.host.close().await {
            warn!(program = %stem, error = %e, "Terminal session not closed");
            run.warnings.push(e);
        }

        if end == WaitEnd::Abandoned {
            return run.fail(ExecutionError::Abandoned);
        }

        run.enter(ExecutionPhase::Done);
        let stdout = self.read_output(&request.output).await;
        run.finish(stdout, screenshot)
    }

    /// Sleep through the settle delay, then poll until idle. Returns `true`
    /// when the maximum wait elapsed with the session still busy. A failed
    /// status query counts as busy.
    async fn poll_until_idle(&self) -> bool {
        tokio::time::sleep(self.execution.settle()).await;
        let deadline = Instant::now() + self.execution.max_wait();
        let interval = self.execution.poll_interval();
        loop {
            match self.host.is_busy().await {
                Ok(false) => return false,
                Ok(true) => {}
                Err(e) => debug!(error = %e, "Busy query failed, assuming still running"),
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep_until((now + interval).min(deadline)).await;
        }
    }

    /// Up to `capture.attempts` screenshots. A capture only counts when the
    /// file exists and is non-empty.
    async fn capture_with_retry(&self, stem: &str, run: &mut Run) -> Option<PathBuf> {
        let target = self.scratch.screenshot_path(stem, self.capture.format);
        tokio::time::sleep(self.execution.pre_capture()).await;
        remove_stale(&target).await;

        let attempts = self.capture.attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.host.screenshot_window(&target).await {
                Ok(()) if is_non_empty(&target).await => {
                    info!(program = %stem, file = %target.display(), attempt, "Screenshot captured");
                    return Some(target);
                }
                Ok(()) => {
                    last = Some(ExecutionError::Capture {
                        message: format!("{} is missing or empty", target.display()),
                    });
                }
                Err(e) => last = Some(e),
            }
            if let Some(e) = &last {
                debug!(program = %stem, attempt, error = %e, "Screenshot attempt failed");
            }
            if attempt < attempts {
                tokio::time::sleep(self.capture.retry_delay()).await;
            }
        }

        let err = last.unwrap_or(ExecutionError::Capture {
            message: "no capture attempt made".into(),
        });
        warn!(program = %stem, attempts, error = %err, "Continuing without screenshot");
        run.warnings.push(err);
        None
    }

    async fn read_output(&self, path: &Path) -> String {
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                String::from_utf8_lossy(&bytes).into_owned()
            }
            _ => self.execution.output_placeholder.clone(),
        }
    }
}

async fn remove_stale(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(file = %path.display(), error = %e, "Could not remove stale artifact");
        }
    }
}

async fn is_non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Mutable bookkeeping for one run.
struct Run {
    phases: Vec<ExecutionPhase>,
    waited: Duration,
    wait_exhausted: bool,
    wait_abandoned: bool,
    warnings: Vec<ExecutionError>,
}

impl Run {
    fn new() -> Self {
        Self {
            phases: Vec::new(),
            waited: Duration::ZERO,
            wait_exhausted: false,
            wait_abandoned: false,
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, phase: ExecutionPhase) {
        debug!(%phase, "Execution phase");
        self.phases.push(phase);
    }

    fn fail(mut self, error: ExecutionError) -> ExecutionOutcome {
        self.phases.push(ExecutionPhase::Failed);
        ExecutionOutcome {
            success: false,
            stdout: String::new(),
            screenshot: None,
            waited: self.waited,
            wait_exhausted: self.wait_exhausted,
            wait_abandoned: self.wait_abandoned,
            error: Some(error),
            warnings: self.warnings,
            phases: self.phases,
        }
    }

    fn finish(self, stdout: String, screenshot: Option<PathBuf>) -> ExecutionOutcome {
        ExecutionOutcome {
            success: true,
            stdout,
            screenshot,
            waited: self.waited,
            wait_exhausted: self.wait_exhausted,
            wait_abandoned: false,
            error: None,
            warnings: self.warnings,
            phases: self.phases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::{HostCall, ScriptedHost};
    use pretty_assertions::assert_eq;
    use ExecutionPhase::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        scratch: ScratchDir,
        exe: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("scratch"));
        scratch.ensure().unwrap();
        let exe = scratch.executable_path("ej1");
        std::fs::write(&exe, b"binary").unwrap();
        Fixture {
            _dir: dir,
            scratch,
            exe,
        }
    }

    fn orchestrator(fx: &Fixture, host: Arc<ScriptedHost>) -> Orchestrator {
        Orchestrator::new(
            host,
            fx.scratch.clone(),
            ExecutionConfig::default(),
            CaptureConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_walks_every_phase() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().with_program_output("sum = 5\n"));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;

        assert!(outcome.success);
        assert_eq!(
            outcome.phases,
            vec![Preparing, Launching, Waiting, Capturing, Closing, Done]
        );
        assert_eq!(outcome.stdout, "sum = 5\n");
        assert_eq!(
            outcome.screenshot,
            Some(fx.scratch.screenshot_path("ej1", Default::default()))
        );
        assert!(!outcome.wait_exhausted);
        assert!(outcome.warnings.is_empty());
        // settle delay passes before the first busy query
        assert_eq!(outcome.waited, Duration::from_millis(2000));
        assert!(fx.scratch.launcher_path("ej1").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_output_uses_placeholder() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new());
        let outcome = orchestrator(&fx, host).run(&fx.exe).await;
        assert!(outcome.success);
        assert_eq!(outcome.stdout, ExecutionConfig::default().output_placeholder);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alternative_launch_recovers() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().with_launches(vec![
            Err(ExecutionError::Launch {
                message: "osascript: not allowed".into(),
            }),
            Ok(()),
        ]));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;
        assert!(outcome.success);
        assert_eq!(host.count(|c| matches!(c, HostCall::LaunchAlternative(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_launches_failing_is_fatal() {
        let fx = fixture();
        let denied = || ExecutionError::Launch {
            message: "denied".into(),
        };
        let host = Arc::new(ScriptedHost::new().with_launches(vec![Err(denied()), Err(denied())]));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;

        assert!(!outcome.success);
        assert_eq!(outcome.phases, vec![Preparing, Launching, Failed]);
        assert_eq!(outcome.error, Some(denied()));
        assert!(outcome.screenshot.is_none());
        // nothing is polled, captured or closed after a failed launch
        assert_eq!(host.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_exhausts_after_max_wait() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().always_busy());
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;

        assert!(outcome.success);
        assert!(outcome.wait_exhausted);
        assert_eq!(outcome.waited, Duration::from_secs(2 + 30));
        // one query at the start of every second of the window plus the last one
        assert_eq!(host.count(|c| *c == HostCall::IsBusy), 31);
        assert_eq!(
            outcome.phases,
            vec![Preparing, Launching, Waiting, Capturing, Closing, Done]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_a_few_polls() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().with_busy(vec![Ok(true), Ok(true), Ok(false)]));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;
        assert!(!outcome.wait_exhausted);
        assert_eq!(outcome.waited, Duration::from_secs(4));
        assert_eq!(host.count(|c| *c == HostCall::IsBusy), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_errors_count_as_busy() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().with_busy(vec![
            Err(ExecutionError::Status {
                message: "AppleEvent timed out".into(),
            }),
            Ok(false),
        ]));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;
        assert!(outcome.success);
        assert_eq!(host.count(|c| *c == HostCall::IsBusy), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_retries_then_succeeds() {
        let fx = fixture();
        let fail = || ExecutionError::Capture {
            message: "no window".into(),
        };
        let host = Arc::new(ScriptedHost::new().with_captures(vec![Err(fail()), Err(fail()), Ok(())]));
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;
        assert!(outcome.screenshot.is_some());
        assert!(outcome.warnings.is_empty());
        assert_eq!(host.count(|c| matches!(c, HostCall::Screenshot(_))), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_captures_failing_is_not_fatal() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().failing_capture());
        let outcome = orchestrator(&fx, host.clone()).run(&fx.exe).await;

        assert!(outcome.success);
        assert!(outcome.screenshot.is_none());
        assert_eq!(host.count(|c| matches!(c, HostCall::Screenshot(_))), 3);
        assert!(matches!(outcome.warnings[..], [ExecutionError::Capture { .. }]));
        assert_eq!(outcome.final_phase(), Some(Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_capture_file_does_not_count() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().with_capture_bytes(Vec::new()));
        let outcome = orchestrator(&fx, host).run(&fx.exe).await;
        assert!(outcome.success);
        assert!(outcome.screenshot.is_none());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_is_only_a_warning() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().failing_close());
        let outcome = orchestrator(&fx, host).run(&fx.exe).await;
        assert!(outcome.success);
        assert!(outcome.screenshot.is_some());
        assert!(matches!(outcome.warnings[..], [ExecutionError::Close { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_wait_and_still_closes() {
        let fx = fixture();
        let host = Arc::new(ScriptedHost::new().always_busy());
        let token = CancellationToken::new();
        let orch = orchestrator(&fx, host.clone()).with_shutdown(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let outcome = orch.run(&fx.exe).await;
        canceller.await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.wait_abandoned);
        assert_eq!(outcome.error, Some(ExecutionError::Abandoned));
        assert_eq!(outcome.waited, Duration::from_secs(5));
        assert_eq!(
            outcome.phases,
            vec![Preparing, Launching, Waiting, Closing, Failed]
        );
        assert_eq!(host.count(|c| *c == HostCall::Close), 1);
        assert_eq!(host.count(|c| matches!(c, HostCall::Screenshot(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_output_is_not_reused() {
        let fx = fixture();
        std::fs::write(fx.scratch.output_path("ej1"), "old run").unwrap();
        let outcome = orchestrator(&fx, Arc::new(ScriptedHost::new()))
            .run(&fx.exe)
            .await;
        assert_eq!(outcome.stdout, ExecutionConfig::default().output_placeholder);
    }
}
