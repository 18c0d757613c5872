//! Expanding command line inputs into source files.
//!
//! Files are taken as given and validated; directories are searched for
//! names matching a glob pattern, optionally recursively. Anything that
//! cannot be processed comes back as a [`Candidate::Rejected`] so the
//! pipeline can document it instead of silently dropping it.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ConfigError;

pub const DEFAULT_PATTERN: &str = "*.cpp";

/// Directory expansion settings.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Glob matched against file names (case-insensitive).
    pub pattern: String,
    pub recursive: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            recursive: false,
        }
    }
}

/// One input after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Source(PathBuf),
    Rejected { path: PathBuf, reason: String },
}

impl Candidate {
    pub fn path(&self) -> &Path {
        match self {
            Candidate::Source(path) | Candidate::Rejected { path, .. } => path,
        }
    }
}

/// Why `path` cannot be compiled, if it cannot.
pub fn validate_source(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err("file not found".to_string());
    }
    if !path.is_file() {
        return Err("not a regular file".to_string());
    }
    let is_cpp = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("cpp"));
    if !is_cpp {
        return Err("not a .cpp file".to_string());
    }
    Ok(())
}

fn matcher(pattern: &str) -> Result<GlobMatcher, ConfigError> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ConfigError::Invalid {
            message: format!("invalid file pattern '{pattern}': {e}"),
        })
}

/// Expand `inputs` in order. Directory matches are sorted; a path reached
/// twice is only kept the first time.
pub fn discover(inputs: &[PathBuf], options: &DiscoveryOptions) -> Result<Vec<Candidate>, ConfigError> {
    let glob = matcher(&options.pattern)?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let found = expand_dir(input, &glob, options.recursive);
            if found.is_empty() {
                warn!(dir = %input.display(), pattern = %options.pattern, "No matching source files");
            }
            for path in found {
                if seen.insert(path.clone()) {
                    out.push(Candidate::Source(path));
                }
            }
            continue;
        }
        if !seen.insert(input.clone()) {
            continue;
        }
        match validate_source(input) {
            Ok(()) => out.push(Candidate::Source(input.clone())),
            Err(reason) => {
                warn!(file = %input.display(), %reason, "Input rejected");
                out.push(Candidate::Rejected {
                    path: input.clone(),
                    reason,
                });
            }
        }
    }
    debug!(count = out.len(), "Inputs discovered");
    Ok(out)
}

fn expand_dir(dir: &Path, glob: &GlobMatcher, recursive: bool) -> Vec<PathBuf> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| glob.is_match(e.file_name()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "int main() {}").unwrap();
    }

    #[test]
    fn test_validate_source() {
        let dir = tempfile::tempdir().unwrap();
        let cpp = dir.path().join("a.CPP");
        let txt = dir.path().join("notes.txt");
        touch(&cpp);
        touch(&txt);
        assert!(validate_source(&cpp).is_ok());
        assert_eq!(validate_source(&txt).unwrap_err(), "not a .cpp file");
        assert_eq!(
            validate_source(&dir.path().join("gone.cpp")).unwrap_err(),
            "file not found"
        );
        assert_eq!(validate_source(dir.path()).unwrap_err(), "not a regular file");
    }

    #[test]
    fn test_directory_expansion_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.cpp"));
        touch(&dir.path().join("a.cpp"));
        touch(&dir.path().join("readme.md"));
        touch(&dir.path().join("sub").join("c.cpp"));

        let found = discover(&[dir.path().to_path_buf()], &DiscoveryOptions::default()).unwrap();
        assert_eq!(
            found,
            vec![
                Candidate::Source(dir.path().join("a.cpp")),
                Candidate::Source(dir.path().join("b.cpp")),
            ]
        );
    }

    #[test]
    fn test_recursive_expansion() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.cpp"));
        touch(&dir.path().join("sub").join("deeper").join("c.cpp"));
        let options = DiscoveryOptions {
            recursive: true,
            ..Default::default()
        };
        let found = discover(&[dir.path().to_path_buf()], &options).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ejercicio1.cpp"));
        touch(&dir.path().join("practica.cpp"));
        let options = DiscoveryOptions {
            pattern: "ejercicio*.cpp".into(),
            recursive: false,
        };
        let found = discover(&[dir.path().to_path_buf()], &options).unwrap();
        assert_eq!(found, vec![Candidate::Source(dir.path().join("ejercicio1.cpp"))]);
    }

    #[test]
    fn test_files_keep_order_and_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let z = dir.path().join("z.cpp");
        let a = dir.path().join("a.cpp");
        touch(&z);
        touch(&a);
        let missing = dir.path().join("missing.cpp");
        let found = discover(
            &[z.clone(), missing.clone(), a.clone(), z.clone()],
            &DiscoveryOptions::default(),
        )
        .unwrap();
        assert_eq!(
            found,
            vec![
                Candidate::Source(z),
                Candidate::Rejected {
                    path: missing,
                    reason: "file not found".into()
                },
                Candidate::Source(a),
            ]
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let options = DiscoveryOptions {
            pattern: "[".into(),
            recursive: false,
        };
        assert!(discover(&[], &options).is_err());
    }
}
