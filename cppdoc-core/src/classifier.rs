//! Heuristic exercise classifier.
//!
//! Each scored category owns a list of regular expressions and a list of
//! keywords. The score of a category is the number of regex matches plus half
//! the number of whole-word, case-insensitive keyword hits. A filename hint
//! naming a category adds a fixed bonus. The highest score wins; on a tie the
//! category later in [`ExerciseCategory::SCORED`] wins, so `Structure` beats
//! `String` beats `Matrix` beats `Vector`. All-zero scores yield `Default`.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ClassifyError;
use crate::source::count_code_lines;
use crate::types::{ClassificationResult, ExerciseCategory, SourceUnit};

/// Bonus added when the filename hint names a category.
pub const FILENAME_BONUS: f64 = 2.0;

const KEYWORD_WEIGHT: f64 = 0.5;

fn patterns_for(category: ExerciseCategory) -> &'static [&'static str] {
    match category {
        ExerciseCategory::Vector => &[
            r"vector\s*<",
            r"array\s*<",
            r"int\s+\w+\s*\[\s*\d*\s*\]",
            r"float\s+\w+\s*\[\s*\d*\s*\]",
            r"double\s+\w+\s*\[\s*\d*\s*\]",
        ],
        ExerciseCategory::Matrix => &[
            r"int\s+\w+\s*\[\s*\d*\s*\]\s*\[\s*\d*\s*\]",
            r"float\s+\w+\s*\[\s*\d*\s*\]\s*\[\s*\d*\s*\]",
            r"double\s+\w+\s*\[\s*\d*\s*\]\s*\[\s*\d*\s*\]",
            r"vector\s*<\s*vector\s*<",
            r"matriz|matrix",
            r"filas|columnas|rows|columns",
        ],
        ExerciseCategory::String => &[
            r"string\s+\w+",
            r"char\s+\w+\s*\[\s*\d*\s*\]",
            r"substr|concatena|reverse|length",
            r"strlen|strcpy|strcat",
            r"getline",
        ],
        ExerciseCategory::Structure => &[
            r"struct\s+\w+",
            r"class\s+\w+",
            r"typedef\s+struct",
            r"private:|public:|protected:",
            r"objeto|instance",
        ],
        ExerciseCategory::Default => &[],
    }
}

fn keywords_for(category: ExerciseCategory) -> &'static [&'static str] {
    match category {
        ExerciseCategory::Vector => &[
            "array", "vector", "arreglo", "lista", "colección", "elemento", "posición", "índice",
            "ordenar", "buscar",
        ],
        ExerciseCategory::Matrix => &[
            "matriz", "matrix", "bidimensional", "fila", "columna", "row", "column", "tabla",
            "cuadrícula", "grid",
        ],
        ExerciseCategory::String => &[
            "string", "cadena", "texto", "caracter", "palabra", "subcadena", "concatenar",
            "invertir", "mayúscula", "minúscula",
        ],
        ExerciseCategory::Structure => &[
            "estructura", "struct", "clase", "class", "objeto", "atributo", "método", "member",
            "instancia", "herencia",
        ],
        ExerciseCategory::Default => &[],
    }
}

/// Filename fragments that hint at a category.
fn filename_hints(category: ExerciseCategory) -> &'static [&'static str] {
    match category {
        ExerciseCategory::Vector => &["vector"],
        ExerciseCategory::Matrix => &["matrix", "matriz"],
        ExerciseCategory::String => &["string", "cadena"],
        ExerciseCategory::Structure => &["structure", "estructura"],
        ExerciseCategory::Default => &[],
    }
}

struct CategoryRules {
    category: ExerciseCategory,
    patterns: Vec<Regex>,
    keywords: Vec<Regex>,
}

/// Compiled classification rules. Cheap to share by reference.
pub struct Classifier {
    rules: Vec<CategoryRules>,
    /// Patterns that failed to compile and are left out of scoring.
    rule_errors: Vec<ClassifyError>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_rule(pattern: &str, errors: &mut Vec<ClassifyError>) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Skipping classifier pattern");
            errors.push(ClassifyError::Pattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}

impl Classifier {
    pub fn new() -> Self {
        let mut rule_errors = Vec::new();
        let rules = ExerciseCategory::SCORED
            .iter()
            .map(|&category| {
                let patterns = patterns_for(category)
                    .iter()
                    .filter_map(|p| compile_rule(p, &mut rule_errors))
                    .collect();
                let keywords = keywords_for(category)
                    .iter()
                    .filter_map(|w| compile_rule(&format!(r"\b{}\b", regex::escape(w)), &mut rule_errors))
                    .collect();
                CategoryRules {
                    category,
                    patterns,
                    keywords,
                }
            })
            .collect();
        Self { rules, rule_errors }
    }

    /// Patterns that were dropped at construction.
    pub fn rule_errors(&self) -> &[ClassifyError] {
        &self.rule_errors
    }

    /// Classify an already scanned source unit, using its file name as hint.
    pub fn classify_unit(&self, unit: &SourceUnit) -> ClassificationResult {
        let hint = unit.path.file_name().map(|n| n.to_string_lossy());
        self.classify(&unit.content, hint.as_deref())
    }

    /// Read and classify a file. An unreadable file yields the default
    /// category with `error` set.
    pub fn classify_file(&self, path: &Path) -> ClassificationResult {
        match SourceUnit::read(path) {
            Ok(unit) => self.classify_unit(&unit),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Classification fell back to default");
                ClassificationResult::failed(e.to_string())
            }
        }
    }

    /// Classify source text. Pure and deterministic; never fails.
    pub fn classify(&self, text: &str, filename_hint: Option<&str>) -> ClassificationResult {
        let mut scores: BTreeMap<ExerciseCategory, f64> = BTreeMap::new();
        let mut matched: BTreeMap<ExerciseCategory, Vec<String>> = BTreeMap::new();

        for rules in &self.rules {
            let mut found = Vec::new();
            for re in &rules.patterns {
                found.extend(re.find_iter(text).map(|m| m.as_str().to_string()));
            }
            let keyword_hits: usize = rules.keywords.iter().map(|re| re.find_iter(text).count()).sum();
            let score = found.len() as f64 + KEYWORD_WEIGHT * keyword_hits as f64;
            scores.insert(rules.category, score);
            if !found.is_empty() {
                matched.insert(rules.category, found);
            }
        }

        if let Some(hint) = filename_hint {
            let hint = hint.to_lowercase();
            for category in ExerciseCategory::SCORED {
                if filename_hints(category).iter().any(|h| hint.contains(h)) {
                    *scores.entry(category).or_insert(0.0) += FILENAME_BONUS;
                }
            }
        }

        let category = pick_category(&scores);
        let complexity = complexity_score(text, &matched, &scores);
        debug!(%category, complexity, "Classified source");

        ClassificationResult {
            category,
            complexity,
            matched,
            scores,
            error: None,
        }
    }
}

/// Highest score wins; later categories win ties; all zero means `Default`.
fn pick_category(scores: &BTreeMap<ExerciseCategory, f64>) -> ExerciseCategory {
    let mut best = ExerciseCategory::Default;
    let mut best_score = 0.0;
    for category in ExerciseCategory::SCORED {
        let score = scores.get(&category).copied().unwrap_or(0.0);
        if score > 0.0 && score >= best_score {
            best = category;
            best_score = score;
        }
    }
    best
}

/// Weighted complexity estimate clamped to 0..=100.
///
/// Line-count bucket (10 / 30 / 50), +20 when struct or class patterns
/// matched, +10 when matrix evidence outweighs vector evidence, and two
/// points per regex match capped at 20.
fn complexity_score(
    text: &str,
    matched: &BTreeMap<ExerciseCategory, Vec<String>>,
    scores: &BTreeMap<ExerciseCategory, f64>,
) -> u8 {
    let lines = count_code_lines(text);
    let mut complexity: u32 = match lines {
        0..30 => 10,
        30..100 => 30,
        _ => 50,
    };

    let has_types = matched.get(&ExerciseCategory::Structure).is_some_and(|m| {
        m.iter().any(|s| {
            let lower = s.to_ascii_lowercase();
            lower.starts_with("class") || lower.starts_with("struct")
        })
    });
    if has_types {
        complexity += 20;
    }

    let matrix_matches = matched.get(&ExerciseCategory::Matrix).map_or(0, Vec::len);
    let vector_score = scores.get(&ExerciseCategory::Vector).copied().unwrap_or(0.0);
    let matrix_score = scores.get(&ExerciseCategory::Matrix).copied().unwrap_or(0.0);
    if matrix_matches > 0 && matrix_score > vector_score {
        complexity += 10;
    }

    let total_matches: usize = matched.values().map(Vec::len).sum();
    complexity += (total_matches as u32).saturating_mul(2).min(20);

    complexity.min(100) as u8
}
