//! Configuration system for cppdoc.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.
//! Configuration is loaded from `~/.config/cppdoc/config.toml` and/or
//! `.cppdoc/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration, passed explicitly into every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub compiler: CompilerConfig,
    pub execution: ExecutionConfig,
    pub capture: CaptureConfig,
    pub report: ReportConfig,
    pub paths: PathsConfig,
}

/// Native compiler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler executable, resolved through `PATH`.
    pub program: String,
    pub flags: Vec<String>,
    /// Wall-clock limit for one compiler run; the child is killed past it.
    pub timeout_secs: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "g++".to_string(),
            flags: vec!["-Wall".to_string(), "-std=c++11".to_string()],
            timeout_secs: 10,
        }
    }
}

impl CompilerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Terminal execution and the busy-poll wait.
///
/// `max_wait_secs` is independent of the compiler timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
    /// Delay after launching before the first busy query.
    pub settle_ms: u64,
    /// Delay between the end of the wait and the first capture attempt.
    pub pre_capture_ms: u64,
    /// Shown in the report when the program left no output artifact.
    pub output_placeholder: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 30,
            poll_interval_ms: 1000,
            settle_ms: 2000,
            pre_capture_ms: 1000,
            output_placeholder: "The program output is shown in the screenshot".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn pre_capture(&self) -> Duration {
        Duration::from_millis(self.pre_capture_ms)
    }
}

/// Image encoding used for terminal screenshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Jpg,
    Png,
}

impl CaptureFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Jpg => "jpg",
            CaptureFormat::Png => "png",
        }
    }
}

impl std::fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Screenshot retry policy and terminal window geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub format: CaptureFormat,
    /// Window bounds as `[left, top, right, bottom]`.
    pub window_bounds: [i32; 4],
    pub rows: u32,
    pub columns: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 500,
            format: CaptureFormat::Jpg,
            window_bounds: [50, 45, 1200, 800],
            rows: 40,
            columns: 120,
        }
    }
}

impl CaptureConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// How program blocks are arranged after the cover page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    /// One block per program: source, result, analysis.
    Interleaved,
    /// All sources, then all results, then all analyses.
    #[default]
    Grouped,
}

impl std::fmt::Display for ReportLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportLayout::Interleaved => write!(f, "interleaved"),
            ReportLayout::Grouped => write!(f, "grouped"),
        }
    }
}

impl std::str::FromStr for ReportLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interleaved" => Ok(ReportLayout::Interleaved),
            "grouped" => Ok(ReportLayout::Grouped),
            other => Err(ConfigError::Invalid {
                message: format!("unknown report layout '{other}' (expected interleaved or grouped)"),
            }),
        }
    }
}

/// Report content and rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub layout: ReportLayout,
    pub file_name: String,
    pub max_image_width_mm: f64,
    /// Directories searched for a TrueType family, in order.
    pub font_dirs: Vec<PathBuf>,
    /// Family name expected as `<family>-Regular.ttf` etc.
    pub font_family: String,
    /// Monospace family used for source listings; falls back to `font_family`.
    pub code_font_family: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "C++ Program Collection".to_string(),
            author: None,
            layout: ReportLayout::Grouped,
            file_name: "programas_cpp.pdf".to_string(),
            max_image_width_mm: 180.0,
            font_dirs: vec![
                PathBuf::from("fonts"),
                PathBuf::from("/usr/share/fonts/truetype/liberation"),
                PathBuf::from("/usr/share/fonts/liberation"),
                PathBuf::from("/Library/Fonts"),
                PathBuf::from("/System/Library/Fonts/Supplemental"),
            ],
            font_family: "LiberationSans".to_string(),
            code_font_family: "LiberationMono".to_string(),
        }
    }
}

/// Filesystem locations. Relative paths resolve against the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("temp_compilation"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl AppConfig {
    /// Make scratch and output paths absolute relative to `workspace`.
    pub fn resolve_paths(mut self, workspace: &Path) -> Self {
        if self.paths.scratch_dir.is_relative() {
            self.paths.scratch_dir = workspace.join(&self.paths.scratch_dir);
        }
        if self.paths.output_dir.is_relative() {
            self.paths.output_dir = workspace.join(&self.paths.output_dir);
        }
        self.report.font_dirs = self
            .report
            .font_dirs
            .into_iter()
            .map(|d| if d.is_relative() { workspace.join(d) } else { d })
            .collect();
        self
    }

    /// Final location of the report file.
    pub fn report_path(&self) -> PathBuf {
        self.paths.output_dir.join(&self.report.file_name)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "compiler.program must not be empty".into(),
            });
        }
        if self.compiler.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "compiler.timeout_secs must be at least 1".into(),
            });
        }
        if self.capture.attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "capture.attempts must be at least 1".into(),
            });
        }
        if self.report.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "report.file_name must not be empty".into(),
            });
        }
        if !(self.report.max_image_width_mm > 0.0) {
            return Err(ConfigError::Invalid {
                message: "report.max_image_width_mm must be positive".into(),
            });
        }
        if self.paths.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "paths.scratch_dir must not be empty".into(),
            });
        }
        let scratch = lexical(&self.paths.scratch_dir);
        if lexical(&self.paths.output_dir).starts_with(&scratch) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "paths.scratch_dir ({}) must not contain the output directory",
                    self.paths.scratch_dir.display()
                ),
            });
        }
        Ok(())
    }

    /// `validate`, plus a check that cleaning the scratch directory cannot
    /// reach `workspace` itself. Expects paths already resolved.
    pub fn validate_in(&self, workspace: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if lexical(workspace).starts_with(lexical(&self.paths.scratch_dir)) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "paths.scratch_dir ({}) must be a directory inside the workspace, not the workspace or one of its parents",
                    self.paths.scratch_dir.display()
                ),
            });
        }
        Ok(())
    }
}

/// Normalise `.` and `..` components without touching the filesystem.
fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "cppdoc", "cppdoc")
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".cppdoc").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `CPPDOC_`)
/// 3. Workspace-local config (`.cppdoc/config.toml`)
/// 4. User config (`~/.config/cppdoc/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CPPDOC_COMPILER__PROGRAM, CPPDOC_EXECUTION__MAX_WAIT_SECS, ...
    figment = figment.merge(Env::prefixed("CPPDOC_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load a single config file on top of the defaults (the `--config` flag).
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Check whether any cppdoc configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration to `.cppdoc/config.toml` unless one exists.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let body = toml::to_string_pretty(&AppConfig::default()).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid {
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    std::fs::write(&path, body).map_err(|e| ConfigError::Invalid {
        message: format!("cannot write {}: {e}", path.display()),
    })?;
    Ok(path)
}
