//! Reading and scanning C++ source files into [`SourceUnit`]s.
//!
//! This is surface-level text scanning with regular expressions, not
//! parsing: it only extracts the facts the report lists per program.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::ClassifyError;
use crate::types::SourceUnit;

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"#include\s*[<"]([^>"]+)[>"]"#).unwrap());
static MAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"int\s+main\s*\([^)]*\)").unwrap());
static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bclass\s+(\w+)").unwrap());
static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:void|int|float|double|char|bool|string)\s+(\w+)\s*\([^)]*\)").unwrap()
});
static CIN_VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"cin\s*>>\s*(\w+)").unwrap());

impl SourceUnit {
    /// Read and scan a source file.
    pub fn read(path: &Path) -> Result<Self, ClassifyError> {
        let bytes = std::fs::read(path).map_err(|e| ClassifyError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %path.display(), "source is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(Self::from_text(path, content))
    }

    /// Scan already loaded source text.
    pub fn from_text(path: &Path, content: String) -> Self {
        let includes = INCLUDE_RE
            .captures_iter(&content)
            .map(|c| c[1].to_string())
            .collect();
        let functions = FUNCTION_RE
            .captures_iter(&content)
            .map(|c| c[1].to_string())
            .collect();
        let classes = CLASS_RE
            .captures_iter(&content)
            .map(|c| c[1].to_string())
            .collect();
        let has_main = MAIN_RE.is_match(&content);
        let requires_input = ["cin", "getline", "scanf"]
            .iter()
            .any(|needle| content.contains(needle));
        let input_types = if requires_input {
            detect_input_types(&content)
        } else {
            Vec::new()
        };
        let lines_of_code = count_code_lines(&content);

        Self {
            path: path.to_path_buf(),
            content,
            includes,
            functions,
            classes,
            has_main,
            requires_input,
            input_types,
            lines_of_code,
        }
    }
}

/// Count non-blank lines that do not open with `//` or `/*`.
pub fn count_code_lines(content: &str) -> usize {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("//") && !l.starts_with("/*"))
        .count()
}

/// Look up the declared type of every variable read with `cin >>`.
fn detect_input_types(content: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for cap in CIN_VAR_RE.captures_iter(content) {
        let var = regex::escape(&cap[1]);
        let decl = format!(r"\b(int|float|double|char|string)\s+{var}\s*;");
        let Ok(decl_re) = Regex::new(&decl) else {
            continue;
        };
        if let Some(found) = decl_re.captures(content) {
            let ty = found[1].to_string();
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
    }
    types
}
