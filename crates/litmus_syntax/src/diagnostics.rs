//! Errors produced while lexing directives and parsing feature expressions.

use miette::Diagnostic;
use thiserror::Error;

/// A malformed feature expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at column {column}")]
    UnexpectedChar { ch: char, column: usize },

    #[error("unexpected '{token}' at column {column}")]
    UnexpectedToken { token: String, column: usize },

    #[error("expression ended unexpectedly")]
    UnexpectedEnd,

    #[error("unclosed '(' at column {column}")]
    UnclosedParen { column: usize },
}

/// What went wrong with a directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveErrorKind {
    #[error("{directive} has an empty entry")]
    EmptyEntry { directive: &'static str },

    #[error("RUN: line has no command")]
    EmptyRun,

    #[error("RUN: line ends with '\\' but no RUN: line follows")]
    UnterminatedContinuation,

    #[error("invalid expression in {directive}: {source}")]
    Expr {
        directive: &'static str,
        #[source]
        source: ExprError,
    },
}

/// A directive error located at a 1-based line of the test file.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("line {line}: {kind}")]
#[diagnostic(code(litmus::directive), help("directives look like `RUN: <command>` or `REQUIRES: feature`"))]
pub struct DirectiveError {
    pub line: usize,
    pub kind: DirectiveErrorKind,
}

impl DirectiveError {
    pub fn new(line: usize, kind: DirectiveErrorKind) -> Self {
        Self { line, kind }
    }
}
