//! Reporting test outcomes.
//!
//! ## TestReporter Trait
//!
//! The scheduler drives a single `TestReporter` from one loop, in completion order, so reporter
//! implementations never see interleaved calls. Two implementations ship:
//!
//! - `ConsoleReporter`: compact human output, with transcripts for tests that need attention
//! - `JsonReporter`: one JSON object per test and a final summary object

use std::io::{self, Write};

use serde::Serialize;

use super::result::{ResultKind, RunSummary, TestResult};
use crate::discovery::TestCase;
use crate::version::LITMUS_VERSION;

/// Receives test outcomes as they complete.
pub trait TestReporter: Send {
    /// Called once discovery has produced every test
    fn on_collection_complete(&mut self, _test_count: usize) {}

    /// Called when a test completes
    fn on_test_complete(&mut self, test: &TestCase, result: &TestResult);

    /// Called when all tests have completed
    fn on_run_complete(&mut self, summary: &RunSummary);
}

fn report_write_error(err: &io::Error) {
    tracing::warn!(%err, "failed to write report");
}

// ============================================================================
// Console reporter
// ============================================================================

/// Human-readable output.
///
/// Without `verbose`, only results that need attention (failures, unexpected passes) are
/// printed, each with its transcript. With `verbose`, every result gets a status line.
pub struct ConsoleReporter {
    pub verbose: bool,
    pub color: bool,
    out: Box<dyn Write + Send>,
    completed: usize,
    total: usize,
}

impl ConsoleReporter {
    pub fn new(verbose: bool, color: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            verbose,
            color,
            out,
            completed: 0,
            total: 0,
        }
    }

    /// Report to stdout, colored when stdout is a terminal.
    pub fn stdout(verbose: bool) -> Self {
        use std::io::IsTerminal;
        let color = io::stdout().is_terminal();
        Self::new(verbose, color, Box::new(io::stdout()))
    }

    fn paint(&self, kind: ResultKind, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        let code = match kind {
            ResultKind::Pass => "32",
            ResultKind::Fail | ResultKind::XPass | ResultKind::Unresolved | ResultKind::Timeout => "31",
            ResultKind::XFail | ResultKind::Unsupported | ResultKind::Skipped => "33",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn write_result(&mut self, test: &TestCase, result: &TestResult) -> io::Result<()> {
        let attention = result.kind.is_failure() || result.kind == ResultKind::XPass;
        if !attention && !self.verbose {
            return Ok(());
        }

        let status = self.paint(result.kind, result.kind.as_str());
        let mut line = format!("{status}: {} ({} of {})", test.name, self.completed, self.total);
        if self.verbose {
            line.push_str(&format!(" [{}ms]", result.elapsed.as_millis()));
        }
        writeln!(self.out, "{line}")?;

        if let Some(reason) = &result.reason {
            if attention || self.verbose {
                writeln!(self.out, "  {reason}")?;
            }
        }
        if attention && !result.runs.is_empty() {
            writeln!(self.out, "******************** TEST '{}' OUTPUT ********************", test.name)?;
            write!(self.out, "{}", result.output())?;
            writeln!(self.out, "********************")?;
        }
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        const LABELS: [(ResultKind, &str); 8] = [
            (ResultKind::Pass, "passed"),
            (ResultKind::Fail, "failed"),
            (ResultKind::XFail, "expectedly failed"),
            (ResultKind::XPass, "unexpectedly passed"),
            (ResultKind::Unsupported, "unsupported"),
            (ResultKind::Unresolved, "unresolved"),
            (ResultKind::Timeout, "timed out"),
            (ResultKind::Skipped, "skipped"),
        ];

        let parts: Vec<String> = LABELS
            .iter()
            .filter(|(kind, _)| summary.count(*kind) > 0)
            .map(|(kind, label)| self.paint(*kind, &format!("{} {label}", summary.count(*kind))))
            .collect();
        let body = if parts.is_empty() {
            "no tests ran".to_string()
        } else {
            parts.join(", ")
        };

        writeln!(self.out)?;
        writeln!(
            self.out,
            "====== {body} in {:.2}s ======",
            summary.duration.as_secs_f64()
        )?;
        self.out.flush()
    }
}

impl TestReporter for ConsoleReporter {
    fn on_collection_complete(&mut self, test_count: usize) {
        self.total = test_count;
        if test_count == 0 {
            if let Err(err) = writeln!(self.out, "No tests collected") {
                report_write_error(&err);
            }
        }
    }

    fn on_test_complete(&mut self, test: &TestCase, result: &TestResult) {
        self.completed += 1;
        if let Err(err) = self.write_result(test, result) {
            report_write_error(&err);
        }
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        if let Err(err) = self.write_summary(summary) {
            report_write_error(&err);
        }
    }
}

// ============================================================================
// JSON lines reporter
// ============================================================================

#[derive(Serialize)]
struct TestRecord<'a> {
    path: &'a str,
    result: ResultKind,
    elapsed_ms: u128,
    exit_codes: Vec<Option<i32>>,
    output: String,
    reason: Option<&'a str>,
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    version: &'static str,
    summary: &'a RunSummary,
}

/// Machine-readable output: one JSON object per line.
pub struct JsonReporter {
    out: Box<dyn Write + Send>,
}

impl JsonReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl TestReporter for JsonReporter {
    fn on_test_complete(&mut self, test: &TestCase, result: &TestResult) {
        let record = TestRecord {
            path: &test.name,
            result: result.kind,
            elapsed_ms: result.elapsed.as_millis(),
            exit_codes: result.exit_codes(),
            output: result.output(),
            reason: result.reason.as_deref(),
        };
        if let Err(err) = self.write_line(&record) {
            report_write_error(&err);
        }
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        if let Err(err) = self.write_line(&SummaryRecord {
            version: LITMUS_VERSION,
            summary,
        }) {
            report_write_error(&err);
        }
    }
}
