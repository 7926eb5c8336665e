//! Fatal configuration errors.
//!
//! Everything here aborts the run before any test is scheduled. Each variant names the scope
//! or path that caused it so the single report printed by the CLI is actionable.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::tools::ToolNotFoundError;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config layer {}: {source}", path.display())]
    #[diagnostic(code(litmus::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config layer {}: {message}", path.display())]
    #[diagnostic(code(litmus::config::parse))]
    Parse { path: PathBuf, message: String },

    #[error("config layer {} was never loaded", scope.display())]
    #[diagnostic(code(litmus::config::unknown_layer))]
    UnknownLayer { scope: PathBuf },

    #[error("cycle in config inheritance: {} is its own ancestor", scope.display())]
    #[diagnostic(
        code(litmus::config::cycle),
        help("remove or redirect one of the `parent` keys along this chain")
    )]
    Cycle { scope: PathBuf },

    #[error("config layer {} names parent {}, which cannot be found", child.display(), parent.display())]
    #[diagnostic(code(litmus::config::missing_parent), help("check the `parent` path; it is relative to the layer file"))]
    MissingParent { child: PathBuf, parent: PathBuf },

    #[error("no {file} found in {} or any parent directory", start.display())]
    #[diagnostic(code(litmus::config::no_entry_layer), help("pass --config <FILE> to name the entry layer"))]
    NoEntryLayer { start: PathBuf, file: &'static str },

    #[error("tool required for discovery is missing (layer {})", scope.display())]
    #[diagnostic(code(litmus::config::required_tool))]
    RequiredTool {
        scope: PathBuf,
        #[source]
        #[diagnostic_source]
        source: ToolNotFoundError,
    },

    #[error("invalid --filter pattern")]
    #[diagnostic(code(litmus::config::filter))]
    InvalidFilter(#[source] regex::Error),
}
