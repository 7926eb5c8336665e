//! Test outcomes and their aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

// ============================================================================
// Result kinds
// ============================================================================

/// Terminal state of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResultKind {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "XFAIL")]
    XFail,
    #[serde(rename = "XPASS")]
    XPass,
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "UNRESOLVED")]
    Unresolved,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl ResultKind {
    pub const ALL: [ResultKind; 8] = [
        ResultKind::Pass,
        ResultKind::Fail,
        ResultKind::XFail,
        ResultKind::XPass,
        ResultKind::Unsupported,
        ResultKind::Unresolved,
        ResultKind::Timeout,
        ResultKind::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Pass => "PASS",
            ResultKind::Fail => "FAIL",
            ResultKind::XFail => "XFAIL",
            ResultKind::XPass => "XPASS",
            ResultKind::Unsupported => "UNSUPPORTED",
            ResultKind::Unresolved => "UNRESOLVED",
            ResultKind::Timeout => "TIMEOUT",
            ResultKind::Skipped => "SKIPPED",
        }
    }

    /// Whether this outcome makes the whole run unsuccessful.
    pub fn is_failure(self) -> bool {
        matches!(self, ResultKind::Fail | ResultKind::Unresolved | ResultKind::Timeout)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Per-test result
// ============================================================================

/// Transcript of one executed run-line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunLineOutput {
    pub command: String,
    /// `None` if the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// The outcome of one test. Built once when the test finishes and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub kind: ResultKind,
    pub elapsed: Duration,
    pub reason: Option<String>,
    pub runs: Vec<RunLineOutput>,
}

impl TestResult {
    pub fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            elapsed: Duration::ZERO,
            reason: None,
            runs: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_runs(mut self, runs: Vec<RunLineOutput>) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::new(ResultKind::Unresolved).with_reason(reason)
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(ResultKind::Skipped).with_reason(reason)
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::new(ResultKind::Unsupported).with_reason(reason)
    }

    pub fn exit_codes(&self) -> Vec<Option<i32>> {
        self.runs.iter().map(|r| r.exit_code).collect()
    }

    /// Shell-style transcript of every executed run-line.
    pub fn output(&self) -> String {
        let mut text = String::new();
        for run in &self.runs {
            text.push_str("$ ");
            text.push_str(&run.command);
            text.push('\n');
            for stream in [&run.stdout, &run.stderr] {
                if !stream.is_empty() {
                    text.push_str(stream);
                    if !stream.ends_with('\n') {
                        text.push('\n');
                    }
                }
            }
            match run.exit_code {
                Some(code) => text.push_str(&format!("# exit {code}\n")),
                None => text.push_str("# killed\n"),
            }
        }
        text
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Totals for a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub counts: BTreeMap<ResultKind, usize>,
    pub success: bool,
    pub has_xpass: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl RunSummary {
    pub fn count(&self, kind: ResultKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Tallies results in whatever order they complete.
#[derive(Debug)]
pub struct ResultAggregator {
    counts: BTreeMap<ResultKind, usize>,
    started: Instant,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, kind: ResultKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn finish(self) -> RunSummary {
        let total = self.counts.values().sum();
        let success = !self.counts.iter().any(|(kind, n)| kind.is_failure() && *n > 0);
        let has_xpass = self.counts.get(&ResultKind::XPass).is_some_and(|n| *n > 0);
        RunSummary {
            total,
            counts: self.counts,
            success,
            has_xpass,
            duration: self.started.elapsed(),
        }
    }
}
