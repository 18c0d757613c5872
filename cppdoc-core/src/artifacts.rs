//! Scratch directory layout, current-session tracking and cleanup.
//!
//! Every artifact of a program embeds its artifact key. The key is the stem
//! of the source file, suffixed `_2`, `_3`, ... when an earlier file of the
//! same run already claimed that stem:
//!
//! | artifact          | name                      |
//! |-------------------|---------------------------|
//! | executable        | `<key>` (+ exe suffix)    |
//! | launcher script   | `run_<key>.sh`            |
//! | screenshot        | `screenshot_<key>.<ext>`  |
//! | normalised image  | `screenshot_<key>_rgb.jpg`|
//! | captured output   | `<key>_output.txt`        |
//!
//! Cleanup only removes regular files and never touches the marker files:
//! the cleanup marker and the manifest naming the keys of the most recent run.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::CaptureFormat;
use crate::error::CleanupError;

/// Name of the marker written after every cleanup pass.
pub const CLEANUP_MARKER: &str = ".cleaned";

/// Artifact keys of the most recent run, one per line.
pub const SESSION_MANIFEST: &str = ".session";

/// A handle on the scratch directory. Only the path; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it is missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn executable_path(&self, stem: &str) -> PathBuf {
        self.root
            .join(format!("{stem}{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn launcher_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("run_{stem}.sh"))
    }

    pub fn screenshot_path(&self, stem: &str, format: CaptureFormat) -> PathBuf {
        self.root
            .join(format!("screenshot_{stem}.{}", format.extension()))
    }

    pub fn output_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}_output.txt"))
    }

    /// Artifact key of an executable built by `executable_path`.
    pub fn artifact_key(executable: &Path) -> String {
        let name = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.strip_suffix(std::env::consts::EXE_SUFFIX) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => name,
        }
    }

    /// Stems recorded by the most recent run; empty when none was recorded.
    pub fn last_session(&self) -> SessionArtifacts {
        let mut session = SessionArtifacts::new();
        if let Ok(text) = std::fs::read_to_string(self.root.join(SESSION_MANIFEST)) {
            for stem in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                session.track(stem);
            }
        }
        session
    }

    /// Record `session` as the most recent run.
    pub fn record_session(&self, session: &SessionArtifacts) -> std::io::Result<()> {
        self.ensure()?;
        let body: String = session.stems().map(|s| format!("{s}\n")).collect();
        std::fs::write(self.root.join(SESSION_MANIFEST), body)
    }

    /// Remove artifact files, keeping markers, directories and, when `keep`
    /// is given, anything belonging to it. Individual failures are logged and skipped; a marker
    /// is written at the end so later runs can tell a cleanup happened.
    pub fn cleanup(&self, keep: Option<&SessionArtifacts>) -> CleanupReport {
        let mut report = CleanupReport::default();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.root.display(), "Scratch directory absent, nothing to clean");
                return report;
            }
            Err(e) => {
                let err = CleanupError::List {
                    path: self.root.clone(),
                    message: e.to_string(),
                };
                warn!(error = %err, "Cleanup skipped");
                report.failed.push((self.root.clone(), err.to_string()));
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_marker(&name) {
                continue;
            }
            if keep.is_some_and(|session| session.owns(&name)) {
                report.kept.push(path);
                continue;
            }
            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                debug!(dir = %path.display(), "Directory left in place");
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(file = %path.display(), "Removed scratch artifact");
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Could not remove scratch artifact");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        if let Err(e) = std::fs::write(self.root.join(CLEANUP_MARKER), chrono::Local::now().to_rfc3339()) {
            warn!(error = %e, "Could not write cleanup marker");
        }
        info!(
            removed = report.removed.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "Scratch cleanup finished"
        );
        report
    }
}

fn is_marker(name: &str) -> bool {
    name == CLEANUP_MARKER || name == SESSION_MANIFEST
}

/// Artifact keys of the files processed in the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionArtifacts {
    stems: BTreeSet<String>,
}

impl SessionArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, stem: impl Into<String>) {
        self.stems.insert(stem.into());
    }

    /// Track `stem` and return the artifact key for it: the stem itself, or
    /// the first free `<stem>_<n>` when it is already taken.
    pub fn claim(&mut self, stem: &str) -> String {
        let key = if self.stems.contains(stem) {
            (2..)
                .map(|n| format!("{stem}_{n}"))
                .find(|candidate| !self.stems.contains(candidate))
                .unwrap_or_else(|| stem.to_string())
        } else {
            stem.to_string()
        };
        self.stems.insert(key.clone());
        key
    }

    pub fn stems(&self) -> impl Iterator<Item = &str> {
        self.stems.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Whether an artifact name embeds one of the tracked stems.
    pub fn owns(&self, artifact_name: &str) -> bool {
        self.stems
            .iter()
            .any(|stem| !stem.is_empty() && artifact_name.contains(stem.as_str()))
    }
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &ScratchDir, stem: &str) {
        dir.ensure().unwrap();
        for path in [
            dir.executable_path(stem),
            dir.launcher_path(stem),
            dir.screenshot_path(stem, CaptureFormat::Jpg),
            dir.output_path(stem),
        ] {
            std::fs::write(path, b"x").unwrap();
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_artifact_names_embed_stem() {
        let dir = ScratchDir::new("/scratch");
        assert_eq!(dir.launcher_path("ej1"), PathBuf::from("/scratch/run_ej1.sh"));
        assert_eq!(
            dir.screenshot_path("ej1", CaptureFormat::Png),
            PathBuf::from("/scratch/screenshot_ej1.png")
        );
        assert_eq!(dir.output_path("ej1"), PathBuf::from("/scratch/ej1_output.txt"));
    }

    #[test]
    fn test_cleanup_keep_current_preserves_session() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path().join("scratch"));
        populate(&dir, "current");
        populate(&dir, "stale");

        let mut session = SessionArtifacts::new();
        session.track("current");
        let report = dir.cleanup(Some(&session));

        assert_eq!(report.kept.len(), 4);
        assert_eq!(report.removed.len(), 4);
        assert!(report.failed.is_empty());
        let left = names(dir.root());
        assert!(left.iter().all(|n| n.contains("current") || n == CLEANUP_MARKER));
        assert!(left.contains(&CLEANUP_MARKER.to_string()));
    }

    #[test]
    fn test_cleanup_without_keep_removes_every_file_but_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path().join("scratch"));
        populate(&dir, "current");
        std::fs::write(dir.root().join(CLEANUP_MARKER), b"old").unwrap();

        let report = dir.cleanup(None);
        assert_eq!(report.removed.len(), 4);
        assert_eq!(names(dir.root()), vec![CLEANUP_MARKER.to_string()]);
    }

    #[test]
    fn test_cleanup_never_descends_into_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("src/deep")).unwrap();
        std::fs::write(tmp.path().join("src/deep/main.cpp"), "int main() {}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let report = dir.cleanup(None);
        assert_eq!(report.removed, vec![tmp.path().join("notes.txt")]);
        assert!(report.failed.is_empty());
        assert!(tmp.path().join("src/deep/main.cpp").exists());
    }

    #[test]
    fn test_claim_suffixes_repeated_stems() {
        let mut session = SessionArtifacts::new();
        assert_eq!(session.claim("ej1"), "ej1");
        assert_eq!(session.claim("ej1"), "ej1_2");
        assert_eq!(session.claim("ej1_2"), "ej1_2_2");
        assert_eq!(session.claim("ej1"), "ej1_3");
        assert_eq!(session.stems().count(), 4);
    }

    #[test]
    fn test_artifact_key_round_trips_executable_path() {
        let dir = ScratchDir::new("/scratch");
        for key in ["ej1", "ej1_2", "tarea.v2"] {
            assert_eq!(ScratchDir::artifact_key(&dir.executable_path(key)), key);
        }
    }

    #[test]
    fn test_cleanup_missing_directory_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path().join("never-created"));
        let report = dir.cleanup(None);
        assert!(report.removed.is_empty());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_cleanup_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path());
        let report = dir.cleanup(Some(&SessionArtifacts::new()));
        assert!(report.removed.is_empty());
        assert!(tmp.path().join(CLEANUP_MARKER).exists());
    }

    #[test]
    fn test_session_manifest_survives_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new(tmp.path().join("scratch"));
        populate(&dir, "ej1");
        populate(&dir, "old");
        let mut session = SessionArtifacts::new();
        session.track("ej1");
        dir.record_session(&session).unwrap();

        let last = dir.last_session();
        assert_eq!(last, session);
        let report = dir.cleanup(Some(&last));
        assert_eq!(report.kept.len(), 4);
        assert!(dir.root().join(SESSION_MANIFEST).exists());
        assert_eq!(dir.last_session().stems().collect::<Vec<_>>(), vec!["ej1"]);
    }

    #[test]
    fn test_last_session_without_manifest_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ScratchDir::new(tmp.path()).last_session().is_empty());
    }

    #[test]
    fn test_session_owns() {
        let mut session = SessionArtifacts::new();
        session.track("bloque6_ejercicio1");
        assert!(session.owns("run_bloque6_ejercicio1.sh"));
        assert!(session.owns("screenshot_bloque6_ejercicio1_rgb.jpg"));
        assert!(!session.owns("run_bloque6_ejercicio2.sh"));
        assert!(!SessionArtifacts::new().owns("anything"));
    }
}
