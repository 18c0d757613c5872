//! macOS Terminal.app host driven through `osascript` and `screencapture`.
//!
//! The module compiles everywhere; only the commands it shells out to are
//! macOS-specific. [`MacTerminalHost::is_available`] reports whether they can
//! be used on the current machine.

use async_trait::async_trait;
use cppdoc_core::config::CaptureConfig;
use cppdoc_core::error::ExecutionError;
use cppdoc_core::terminal::{LaunchRequest, TerminalHost, shell_quote};
use std::path::Path;
use tracing::{debug, warn};

/// Strip user home directories from error text before it is logged or
/// embedded in the report.
fn sanitize_error_message(msg: &str) -> String {
    let mut result = msg.to_string();
    for prefix in ["/Users/", "/home/"] {
        while let Some(start) = result.find(prefix) {
            let after = start + prefix.len();
            match result[after..].find('/') {
                Some(slash) => result.replace_range(start..after + slash + 1, "~/"),
                None => break,
            }
        }
    }
    result
}

/// Run an AppleScript via osascript and return stdout.
pub(crate) async fn run_osascript(script: &str) -> Result<String, String> {
    let output = tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(script)
        .output()
        .await
        .map_err(|e| format!("Failed to run osascript: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(format!(
            "AppleScript error: {}",
            sanitize_error_message(&stderr)
        ))
    }
}

/// Run a CLI command and return stdout.
pub(crate) async fn run_command(cmd: &str, args: &[&str]) -> Result<String, String> {
    let output = tokio::process::Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("Failed to run {cmd}: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(format!("{cmd} error: {}", sanitize_error_message(&stderr)))
    }
}

/// Escape a string for use inside an AppleScript string literal.
pub(crate) fn sanitize_applescript_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .replace('\0', "")
}

/// AppleScript that opens a Terminal window running `script` and sizes it.
pub(crate) fn launch_script(script: &Path, capture: &CaptureConfig) -> String {
    let [left, top, right, bottom] = capture.window_bounds;
    format!(
        "tell application \"Terminal\"\n\
         \tdo script \"{command}\"\n\
         \tset bounds of front window to {{{left}, {top}, {right}, {bottom}}}\n\
         \tset number of rows of front window to {rows}\n\
         \tset number of columns of front window to {columns}\n\
         \tactivate\n\
         end tell",
        command = sanitize_applescript_string(&shell_quote(script)),
        rows = capture.rows,
        columns = capture.columns,
    )
}

/// True when any tab of any Terminal window has a running process.
pub(crate) const BUSY_SCRIPT: &str = r#"tell application "Terminal"
	set isBusy to false
	repeat with w in windows
		repeat with t in tabs of w
			if busy of t then
				set isBusy to true
				exit repeat
			end if
		end repeat
		if isBusy then exit repeat
	end repeat
	return isBusy
end tell"#;

const WINDOW_ID_SCRIPT: &str = r#"tell application "Terminal" to id of front window"#;
const BOUNDS_SCRIPT: &str = r#"tell application "Terminal" to get bounds of front window"#;
const CLOSE_SCRIPT: &str = r#"tell application "Terminal" to close front window"#;

/// Parse the osascript answer to the busy query.
pub(crate) fn parse_busy(answer: &str) -> Result<bool, String> {
    match answer.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("unexpected busy answer '{other}'")),
    }
}

/// Parse `left, top, right, bottom` into a `screencapture -R` rectangle
/// `x,y,w,h`.
pub(crate) fn parse_bounds(answer: &str) -> Option<String> {
    let coords: Vec<i32> = answer
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    let [left, top, right, bottom] = coords.as_slice() else {
        return None;
    };
    let (width, height) = (right - left, bottom - top);
    (width > 0 && height > 0).then(|| format!("{left},{top},{width},{height}"))
}

/// Terminal.app on macOS.
pub struct MacTerminalHost {
    capture: CaptureConfig,
}

impl MacTerminalHost {
    pub fn new(capture: CaptureConfig) -> Self {
        Self { capture }
    }

    async fn capture_window(&self, target: &str, format: &str) -> Result<(), String> {
        let id = run_osascript(WINDOW_ID_SCRIPT).await?;
        let id = id
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("unexpected window id '{id}'"))?;
        run_command(
            "screencapture",
            &[&format!("-l{id}"), "-x", "-t", format, target],
        )
        .await
        .map(|_| ())
    }

    async fn capture_region(&self, target: &str, format: &str) -> Result<(), String> {
        let bounds = run_osascript(BOUNDS_SCRIPT).await?;
        let region =
            parse_bounds(&bounds).ok_or_else(|| format!("unexpected window bounds '{bounds}'"))?;
        run_command(
            "screencapture",
            &["-R", &region, "-x", "-t", format, target],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl TerminalHost for MacTerminalHost {
    fn name(&self) -> &str {
        "Terminal.app"
    }

    async fn is_available(&self) -> bool {
        cfg!(target_os = "macos") && run_osascript("return 1").await.is_ok()
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        debug!(label = %request.label, "Opening Terminal window");
        run_osascript(&launch_script(&request.script, &self.capture))
            .await
            .map(|_| ())
            .map_err(|message| ExecutionError::Launch { message })
    }

    async fn launch_alternative(&self, request: &LaunchRequest) -> Result<(), ExecutionError> {
        let script = request.script.display().to_string();
        run_command("open", &["-a", "Terminal", &script])
            .await
            .map(|_| ())
            .map_err(|message| ExecutionError::Launch { message })
    }

    async fn is_busy(&self) -> Result<bool, ExecutionError> {
        let answer = run_osascript(BUSY_SCRIPT)
            .await
            .map_err(|message| ExecutionError::Status { message })?;
        parse_busy(&answer).map_err(|message| ExecutionError::Status { message })
    }

    async fn screenshot_window(&self, target: &Path) -> Result<(), ExecutionError> {
        let path = target.display().to_string();
        let format = self.capture.format.extension();
        match self.capture_window(&path, format).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Window capture failed, falling back to region capture");
                self.capture_region(&path, format)
                    .await
                    .map_err(|message| ExecutionError::Capture { message })
            }
        }
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        run_osascript(CLOSE_SCRIPT)
            .await
            .map(|_| ())
            .map_err(|message| ExecutionError::Close { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_applescript_string() {
        assert_eq!(sanitize_applescript_string(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(sanitize_applescript_string("a\\b"), "a\\\\b");
        assert_eq!(sanitize_applescript_string("a\nb\0"), "a\\nb");
    }

    #[test]
    fn test_sanitize_error_message() {
        assert_eq!(
            sanitize_error_message("cannot open /Users/ana/work/run.sh"),
            "cannot open ~/work/run.sh"
        );
        assert_eq!(
            sanitize_error_message("/home/bob/x and /home/bob/y"),
            "~/x and ~/y"
        );
        assert_eq!(sanitize_error_message("/Users/"), "/Users/");
    }

    #[test]
    fn test_launch_script_uses_geometry_and_quotes_path() {
        let script = launch_script(
            Path::new("/tmp/it's here/run_hello.sh"),
            &CaptureConfig::default(),
        );
        assert!(script.contains(r#"do script "'/tmp/it'\\''s here/run_hello.sh'""#));
        assert!(script.contains("set bounds of front window to {50, 45, 1200, 800}"));
        assert!(script.contains("set number of rows of front window to 40"));
        assert!(script.contains("set number of columns of front window to 120"));
        assert!(script.ends_with("end tell"));
    }

    #[test]
    fn test_parse_busy() {
        assert_eq!(parse_busy("true\n"), Ok(true));
        assert_eq!(parse_busy("false"), Ok(false));
        assert!(parse_busy("missing value").is_err());
    }

    #[test]
    fn test_parse_bounds() {
        assert_eq!(
            parse_bounds("50, 45, 1200, 800").as_deref(),
            Some("50,45,1150,755")
        );
        assert_eq!(parse_bounds("1, 2, 3"), None);
        assert_eq!(parse_bounds("10, 10, 5, 20"), None);
        assert_eq!(parse_bounds("a, b, c, d"), None);
    }
}
