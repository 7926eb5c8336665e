//! Test-file syntax for litmus: directive lexing and feature expressions.
//!
//! This crate is "syntax-only": it turns the text of a test file into a typed list of
//! directives and knows how to evaluate feature expressions against a caller-supplied
//! predicate. It has no filesystem, configuration, or process knowledge.
//!
//! ## Examples
//! ```rust
//! use litmus_syntax::parse_directives;
//!
//! let source = "; REQUIRES: shell\n; RUN: echo hi\n";
//! let directives = parse_directives(source).unwrap();
//! assert_eq!(directives.run_lines.len(), 1);
//! assert!(directives.missing_features(|f| f == "shell").is_empty());
//! ```

pub mod diagnostics;
pub mod directives;
pub mod expr;

pub use diagnostics::{DirectiveError, DirectiveErrorKind, ExprError};
pub use directives::{Directive, DirectiveKind, RunLine, TestDirectives, lex_directives, parse_directives};
pub use expr::{FeatureExpr, parse_expr};
