//! Directive lexer for test files.
//!
//! A directive is a marker (`RUN:`, `REQUIRES:`, `XFAIL:`, `UNSUPPORTED:`) found anywhere on a
//! line, usually behind the comment leader of the language under test:
//!
//! ```text
//! ; REQUIRES: shell, !windows
//! ; XFAIL: always
//! ; RUN: %opt -passes=value-numbering %s \
//! ; RUN:   | FileCheck %s
//! ; RUN: -rm -f %t
//! ; END.
//! ```
//!
//! ## Notes
//! - Scanning stops at a line whose marker is `END.` (followed only by whitespace).
//! - A `RUN:` body ending in `\` continues on the next `RUN:` line.
//! - A `RUN:` body starting with `-` does not abort the pipeline when it fails.
//! - `REQUIRES:`, `XFAIL:` and `UNSUPPORTED:` take comma-separated feature expressions and
//!   accumulate across lines.

use crate::diagnostics::{DirectiveError, DirectiveErrorKind};
use crate::expr::{FeatureExpr, parse_expr};

/// One command template taken from `RUN:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLine {
    /// Raw command template, before substitution.
    pub command: String,
    /// 1-based line of the first `RUN:` contributing to this command.
    pub line: usize,
    /// Whether a failure of this command aborts the remaining commands.
    pub propagate_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    Requires(Vec<FeatureExpr>),
    XFail(Vec<FeatureExpr>),
    Unsupported(Vec<FeatureExpr>),
    Run(RunLine),
}

/// A directive together with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Run,
    Requires,
    XFail,
    Unsupported,
    End,
}

impl Marker {
    const ALL: [(&'static str, Marker); 5] = [
        ("RUN:", Marker::Run),
        ("REQUIRES:", Marker::Requires),
        ("XFAIL:", Marker::XFail),
        ("UNSUPPORTED:", Marker::Unsupported),
        ("END.", Marker::End),
    ];

    fn name(self) -> &'static str {
        match self {
            Marker::Run => "RUN",
            Marker::Requires => "REQUIRES",
            Marker::XFail => "XFAIL",
            Marker::Unsupported => "UNSUPPORTED",
            Marker::End => "END",
        }
    }
}

/// Find the left-most marker on a line that is not glued to a preceding word.
///
/// Returns the marker and the text following it.
fn find_marker(line: &str) -> Option<(Marker, &str)> {
    let mut best: Option<(usize, Marker, &str)> = None;
    for (text, marker) in Marker::ALL {
        let mut search_from = 0;
        while let Some(offset) = line[search_from..].find(text) {
            let start = search_from + offset;
            let glued = line[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
            if !glued {
                if best.is_none_or(|(pos, _, _)| start < pos) {
                    best = Some((start, marker, &line[start + text.len()..]));
                }
                break;
            }
            search_from = start + text.len();
        }
    }
    best.map(|(_, marker, rest)| (marker, rest))
}

/// Pending `RUN:` text while a `\` continuation is open.
struct PendingRun {
    text: String,
    line: usize,
}

fn finish_run(pending: PendingRun) -> Result<RunLine, DirectiveError> {
    let text = pending.text.trim();
    let (command, propagate_failure) = match text.strip_prefix('-') {
        Some(rest) => (rest.trim_start(), false),
        None => (text, true),
    };
    if command.is_empty() {
        return Err(DirectiveError::new(pending.line, DirectiveErrorKind::EmptyRun));
    }
    Ok(RunLine {
        command: command.to_string(),
        line: pending.line,
        propagate_failure,
    })
}

fn parse_expr_list(marker: Marker, body: &str, line: usize) -> Result<Vec<FeatureExpr>, DirectiveError> {
    let directive = marker.name();
    body.split(',')
        .map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return Err(DirectiveError::new(line, DirectiveErrorKind::EmptyEntry { directive }));
            }
            parse_expr(item).map_err(|source| DirectiveError::new(line, DirectiveErrorKind::Expr { directive, source }))
        })
        .collect()
}

/// Lex every directive in a test file, in source order.
///
/// ## Errors
/// Returns every malformed directive found; lexing continues past errors so a test author
/// sees all problems at once.
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn lex_directives(source: &str) -> Result<Vec<Directive>, Vec<DirectiveError>> {
    let mut directives = Vec::new();
    let mut errors = Vec::new();
    let mut pending: Option<PendingRun> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let Some((marker, rest)) = find_marker(raw) else {
            continue;
        };

        match marker {
            Marker::End => {
                if rest.trim().is_empty() {
                    break;
                }
            }
            Marker::Run => {
                let body = rest.trim();
                let mut run = pending.take().unwrap_or(PendingRun {
                    text: String::new(),
                    line,
                });
                run.text.push_str(body);
                if let Some(stripped) = run.text.strip_suffix('\\') {
                    run.text = stripped.to_string();
                    pending = Some(run);
                    continue;
                }
                let start = run.line;
                match finish_run(run) {
                    Ok(run_line) => directives.push(Directive {
                        kind: DirectiveKind::Run(run_line),
                        line: start,
                    }),
                    Err(e) => errors.push(e),
                }
            }
            Marker::Requires | Marker::XFail | Marker::Unsupported => match parse_expr_list(marker, rest, line) {
                Ok(exprs) => {
                    let kind = match marker {
                        Marker::Requires => DirectiveKind::Requires(exprs),
                        Marker::XFail => DirectiveKind::XFail(exprs),
                        _ => DirectiveKind::Unsupported(exprs),
                    };
                    directives.push(Directive { kind, line });
                }
                Err(e) => errors.push(e),
            },
        }
    }

    if let Some(run) = pending {
        errors.push(DirectiveError::new(run.line, DirectiveErrorKind::UnterminatedContinuation));
    }

    if errors.is_empty() { Ok(directives) } else { Err(errors) }
}

/// Directives of one test, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestDirectives {
    pub requires: Vec<FeatureExpr>,
    pub xfail: Vec<FeatureExpr>,
    pub unsupported: Vec<FeatureExpr>,
    pub run_lines: Vec<RunLine>,
}

impl TestDirectives {
    pub fn from_directives(directives: Vec<Directive>) -> Self {
        let mut grouped = TestDirectives::default();
        for directive in directives {
            match directive.kind {
                DirectiveKind::Requires(exprs) => grouped.requires.extend(exprs),
                DirectiveKind::XFail(exprs) => grouped.xfail.extend(exprs),
                DirectiveKind::Unsupported(exprs) => grouped.unsupported.extend(exprs),
                DirectiveKind::Run(run) => grouped.run_lines.push(run),
            }
        }
        grouped
    }

    /// `REQUIRES:` expressions that do not hold, rendered for display.
    pub fn missing_features<F>(&self, is_feature: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.requires
            .iter()
            .filter(|expr| !expr.evaluate(&is_feature))
            .map(ToString::to_string)
            .collect()
    }

    /// The first `XFAIL:` expression that holds, if any.
    pub fn xfail_match<F>(&self, matches: F) -> Option<&FeatureExpr>
    where
        F: Fn(&str) -> bool,
    {
        self.xfail.iter().find(|expr| expr.evaluate(&matches))
    }

    /// The first `UNSUPPORTED:` expression that holds, if any.
    pub fn unsupported_match<F>(&self, matches: F) -> Option<&FeatureExpr>
    where
        F: Fn(&str) -> bool,
    {
        self.unsupported.iter().find(|expr| expr.evaluate(&matches))
    }
}

/// Lex and group the directives of a test file.
///
/// ## Errors
/// Returns the directive errors reported by [`lex_directives`].
pub fn parse_directives(source: &str) -> Result<TestDirectives, Vec<DirectiveError>> {
    lex_directives(source).map(TestDirectives::from_directives)
}
