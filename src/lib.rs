#![forbid(unsafe_code)]
//! litmus: declarative toolchain test runner
//!
//! A suite is a directory of test files whose `RUN:` lines are shell commands built from
//! configured substitutions. Configuration comes from a chain of TOML layers: an
//! installation-specific entry layer (tool locations, target facts) delegating to a suite layer
//! (what a test is, how commands are spelled), refined by `litmus.local.toml` layers in
//! subdirectories.
//!
//! ## Pipeline
//!
//! `config::load_chain` → `config::ConfigCascade::resolve` → `discovery::TestDiscovery` →
//! `runner::TestRunner` → `runner::reporter` and `runner::result::RunSummary`.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module
//!   enforces `#![deny(clippy::unwrap_used)]`.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod runner;
pub mod substitution;
pub mod tools;
pub mod version;

pub use config::{ConfigCascade, ConfigError, ConfigLayer, EffectiveConfig};
pub use discovery::{Selection, TestCase, TestDiscovery};
pub use runner::result::{ResultKind, RunSummary, TestResult};
pub use runner::{RunnerConfig, TestRunner};
pub use substitution::{SubstitutionEngine, SubstitutionError};
pub use tools::{ToolNotFoundError, ToolResolver};
