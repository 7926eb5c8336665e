//! Run-line substitution.
//!
//! A template is rewritten by a single left-to-right scan. At each position the rules are tried
//! in order and the first whose literal pattern matches is applied; scanning resumes after the
//! matched pattern, so replacement text is never rescanned. `%%` always produces a literal `%`.
//! Unrecognized placeholders are copied through unchanged, but a `%{` placeholder must be
//! closed and non-empty.
//!
//! ## Rule order for a test
//!
//! 1. resolved tool and library placeholders (`%{opt}`)
//! 2. configured rules, most specific layer first
//! 3. `%{var:NAME}` for string and list variables
//! 4. per-test built-ins: `%s`, `%S`, `%p`, `%t`, `%T`, `%{pathsep}`

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{EffectiveConfig, PATH_LIST_SEPARATOR, SubstitutionRule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    #[error("malformed placeholder `{token}` at byte {offset}: {problem}")]
    TemplateSyntax {
        token: String,
        offset: usize,
        problem: &'static str,
    },
}

/// An ordered rule list applied to command templates.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionEngine {
    rules: Vec<SubstitutionRule>,
}

impl SubstitutionEngine {
    pub fn new(rules: Vec<SubstitutionRule>) -> Self {
        Self { rules }
    }

    /// Rewrite `template`.
    ///
    /// ## Errors
    /// [`SubstitutionError::TemplateSyntax`] for `%{` without a closing `}`, for `%{}`, and for a
    /// name holding whitespace or `{`.
    pub fn substitute(&self, template: &str) -> Result<String, SubstitutionError> {
        let mut out = String::with_capacity(template.len());
        let mut pos = 0;

        'scan: while pos < template.len() {
            let rest = &template[pos..];

            if rest.starts_with("%%") {
                out.push('%');
                pos += 2;
                continue;
            }

            for rule in &self.rules {
                if !rule.pattern.is_empty() && rest.starts_with(rule.pattern.as_str()) {
                    out.push_str(&rule.replacement);
                    pos += rule.pattern.len();
                    continue 'scan;
                }
            }

            if rest.starts_with("%{") {
                check_brace(rest, pos)?;
            }

            // Copy one character through unchanged.
            let ch_len = rest.chars().next().map_or(1, char::len_utf8);
            out.push_str(&rest[..ch_len]);
            pos += ch_len;
        }

        Ok(out)
    }
}

/// Validate an unmatched `%{...}` placeholder starting at `rest`.
fn check_brace(rest: &str, offset: usize) -> Result<(), SubstitutionError> {
    let body = &rest[2..];
    match body.find(['}', '{', ' ', '\t', '\n']) {
        Some(end) if body[end..].starts_with('}') => {
            if end == 0 {
                Err(SubstitutionError::TemplateSyntax {
                    token: "%{}".to_string(),
                    offset,
                    problem: "empty name",
                })
            } else {
                Ok(())
            }
        }
        Some(end) => match body[end..].find('}') {
            // Closed later, but the name in between holds whitespace or a nested `{`.
            Some(close) => Err(SubstitutionError::TemplateSyntax {
                token: rest[..2 + end + close + 1].to_string(),
                offset,
                problem: "invalid placeholder name",
            }),
            None => Err(unclosed(rest, offset, 2 + end)),
        },
        None => Err(unclosed(rest, offset, rest.len())),
    }
}

fn unclosed(rest: &str, offset: usize, token_end: usize) -> SubstitutionError {
    SubstitutionError::TemplateSyntax {
        token: rest[..token_end].to_string(),
        offset,
        problem: "missing closing `}`",
    }
}

/// Per-test locations fed into the built-in rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPaths {
    /// The test file (`%s`).
    pub source: PathBuf,
    /// A scratch path unique to the test (`%t`).
    pub temp: PathBuf,
    /// The directory holding `temp` (`%T`), also the working directory of its run-lines.
    pub temp_dir: PathBuf,
}

impl TestPaths {
    /// Paths for the test at `relative` (relative to the source root) under `exec_root`.
    pub fn new(source: &Path, relative: &Path, exec_root: &Path) -> Self {
        let mut output = exec_root.join("Output").join(relative);
        let stem = output
            .file_name()
            .map(|n| format!("{}.tmp", n.to_string_lossy()))
            .unwrap_or_else(|| "test.tmp".to_string());
        output.set_file_name(stem);
        let temp_dir = output.parent().map(Path::to_path_buf).unwrap_or_else(|| exec_root.to_path_buf());
        Self {
            source: source.to_path_buf(),
            temp: output,
            temp_dir,
        }
    }

    pub fn source_dir(&self) -> &Path {
        self.source.parent().unwrap_or(Path::new("."))
    }
}

/// `%s`, `%S`, `%p`, `%t`, `%T` and `%{pathsep}`.
pub fn builtin_rules(paths: &TestPaths) -> Vec<SubstitutionRule> {
    let source_dir = paths.source_dir().display().to_string();
    vec![
        SubstitutionRule::new("%s", paths.source.display().to_string()),
        SubstitutionRule::new("%S", source_dir.clone()),
        SubstitutionRule::new("%p", source_dir),
        SubstitutionRule::new("%t", paths.temp.display().to_string()),
        SubstitutionRule::new("%T", paths.temp_dir.display().to_string()),
        SubstitutionRule::new("%{pathsep}", PATH_LIST_SEPARATOR),
    ]
}

/// Configured rules followed by `%{var:NAME}` rules.
pub fn config_rules(config: &EffectiveConfig) -> Vec<SubstitutionRule> {
    let mut rules = config.substitutions.clone();
    rules.extend(config.vars.iter().filter_map(|(name, value)| {
        value
            .as_substitution()
            .map(|text| SubstitutionRule::new(format!("%{{var:{name}}}"), text))
    }));
    rules
}

/// The complete engine for one test: `resolved` tool rules, config rules, built-ins.
pub fn engine_for_test(
    config: &EffectiveConfig,
    resolved: Vec<SubstitutionRule>,
    paths: &TestPaths,
) -> SubstitutionEngine {
    let mut rules = resolved;
    rules.extend(config_rules(config));
    rules.extend(builtin_rules(paths));
    SubstitutionEngine::new(rules)
}

/// The `%{name}` placeholder for a tool or library.
pub fn placeholder(name: &str) -> String {
    format!("%{{{name}}}")
}
