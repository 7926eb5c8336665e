//! CLI module for litmus
//!
//! ## Usage
//!
//! `litmus [TEST_PATH]... [--config FILE] [-j N] [--timeout SECONDS] [--filter REGEX]
//! [--output human|machine] [--max-failures N] [-v] [--show-config]`
//!
//! ## Modules
//!
//! - `test_runner` - locating the suite, discovery, and running it
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod test_runner;

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueEnum};

use crate::config::ConfigError;
use crate::version::LITMUS_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// At least one test failed, or the run was interrupted.
    pub const FAILURE: ExitCode = ExitCode(1);
    /// The suite could not be configured; nothing ran.
    pub const CONFIG_ERROR: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Create a configuration error (exit code 2).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::CONFIG_ERROR)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    /// Render through miette so the report carries the diagnostic code, help, and source chain.
    fn from(err: ConfigError) -> Self {
        let report = miette::Report::new(err);
        Self::config(format!("{report:?}"))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Compact console output
    #[default]
    Human,
    /// One JSON object per line
    Machine,
}

/// Declarative toolchain test runner
#[derive(Parser, Debug)]
#[command(name = "litmus")]
#[command(version = LITMUS_VERSION)]
#[command(about = "Discover and run declarative toolchain test suites", long_about = None)]
pub struct Cli {
    /// Test files or directories to run (default: the whole suite)
    #[arg(value_name = "TEST_PATH")]
    pub paths: Vec<PathBuf>,

    /// Entry config layer (default: nearest litmus.toml above the first TEST_PATH)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of tests to run in parallel (default: available cores)
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<NonZeroUsize>,

    /// Per-test timeout in seconds, overriding the config; 0 disables
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Only run tests whose path matches this regular expression
    #[arg(long, value_name = "REGEX")]
    pub filter: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Stop starting new tests after N failures
    #[arg(long, value_name = "N")]
    pub max_failures: Option<NonZeroUsize>,

    /// Show every result; repeat for debug logging
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print the effective configuration of the entry layer as JSON and exit
    #[arg(long)]
    pub show_config: bool,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run(cli: Cli) {
    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let options = test_runner::RunOptions::from(cli);
    if options.show_config {
        return test_runner::show_config(&options);
    }
    test_runner::run_suite(&options)
}

// ============================================================================
// Tests
// ============================================================================
