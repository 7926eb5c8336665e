//! Suite orchestration for the CLI.
//!
//! One invocation is one pass: load the entry layer chain, discover every selected test, run
//! them on the worker pool, and map the summary onto an exit code.
//!
//! ## Errors
//!
//! Configuration problems (unreadable or malformed layers, inheritance cycles, missing parents,
//! missing discovery-required tools, a bad `--filter`) are returned as exit code 2 before any
//! test starts.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Cli, CliError, CliResult, ExitCode, OutputFormat};
use crate::config::{ConfigCascade, find_entry_layer, load_chain};
use crate::discovery::{Selection, discover};
use crate::runner::executor::{KillSwitch, ShellExecutor};
use crate::runner::reporter::{ConsoleReporter, JsonReporter, TestReporter};
use crate::runner::result::RunSummary;
use crate::runner::{RunnerConfig, TestRunner, default_workers};

/// Options for one run, decoupled from clap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub paths: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub workers: usize,
    pub timeout: Option<u64>,
    pub filter: Option<String>,
    pub output: OutputFormat,
    pub max_failures: Option<usize>,
    pub verbose: bool,
    pub show_config: bool,
}

impl From<Cli> for RunOptions {
    fn from(cli: Cli) -> Self {
        Self {
            paths: cli.paths,
            config: cli.config,
            workers: cli.workers.map_or_else(default_workers, |n| n.get()),
            timeout: cli.timeout,
            filter: cli.filter,
            output: cli.output,
            max_failures: cli.max_failures.map(|n| n.get()),
            verbose: cli.verbose > 0,
            show_config: cli.show_config,
        }
    }
}

impl RunOptions {
    /// The entry layer: `--config`, else the nearest layer above the first path or the cwd.
    fn entry_layer(&self) -> CliResult<PathBuf> {
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }
        let start = match self.paths.first() {
            Some(path) => path.clone(),
            None => std::env::current_dir()
                .map_err(|e| CliError::config(format!("cannot determine current directory: {e}")))?,
        };
        Ok(find_entry_layer(&start)?)
    }

    fn load(&self) -> CliResult<(ConfigCascade, PathBuf)> {
        let entry_file = self.entry_layer()?;
        let mut cascade = ConfigCascade::new();
        let entry = load_chain(&mut cascade, &entry_file)?;
        Ok((cascade, entry))
    }
}

/// Print the resolved configuration of the entry layer.
pub fn show_config(options: &RunOptions) -> CliResult<ExitCode> {
    let (cascade, entry) = options.load()?;
    let config = cascade.resolve(&entry)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| CliError::failure(format!("cannot serialize configuration: {e}")))?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

/// Discover and run the selected tests.
pub fn run_suite(options: &RunOptions) -> CliResult<ExitCode> {
    let (cascade, entry) = options.load()?;
    let selection = Selection::new(options.paths.clone(), options.filter.as_deref())?;
    let cases = discover(&cascade, &entry, selection)?;
    tracing::info!(tests = cases.len(), "discovery complete");

    let mut reporter: Box<dyn TestReporter> = match options.output {
        OutputFormat::Human => Box::new(ConsoleReporter::stdout(options.verbose)),
        OutputFormat::Machine => Box::new(JsonReporter::stdout()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("cannot start async runtime: {e}")))?;

    let kill = KillSwitch::new();
    let runner = TestRunner::new(
        ShellExecutor::with_kill_switch(&kill),
        RunnerConfig {
            workers: options.workers,
            timeout_override: options.timeout,
            max_failures: options.max_failures,
        },
    );
    let interrupted = Arc::new(AtomicBool::new(false));

    let summary = runtime.block_on(async {
        watch_interrupt(runner.abort_handle(), kill, Arc::clone(&interrupted));
        runner.run(cases, reporter.as_mut()).await
    });

    Ok(exit_code(&summary, interrupted.load(Ordering::SeqCst)))
}

/// The first Ctrl-C raises the abort flag so running tests finish and the rest are skipped; a
/// second one kills the running tests' process groups.
fn watch_interrupt(abort: Arc<AtomicBool>, kill: KillSwitch, interrupted: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupted; waiting for running tests to finish (Ctrl-C again kills them)");
        interrupted.store(true, Ordering::SeqCst);
        abort.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted again; killing running tests");
            kill.trigger();
        }
    });
}

/// 0 when every test succeeded and the run was not cut short, else 1.
pub fn exit_code(summary: &RunSummary, interrupted: bool) -> ExitCode {
    if summary.success && !interrupted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
