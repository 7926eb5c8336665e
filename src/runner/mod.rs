//! Test scheduling and execution.
//!
//! ## Model
//!
//! Discovery produces the complete, immutable list of tests before anything runs. A fixed pool
//! of worker tasks claims tests through an atomic cursor, runs each to completion, writes its
//! result into the test's write-once slot, and sends the test's index to a single reporting
//! loop. Reporting and aggregation therefore see results one at a time, in completion order.
//!
//! Raising the abort flag (Ctrl-C, or reaching `max_failures`) stops workers from claiming new
//! tests; tests already running finish normally, and every unclaimed test is reported SKIPPED.
//! A running test whose pipeline is killed through the executor's kill switch is UNRESOLVED.
//!
//! ## Modules
//!
//! - `executor` - `TestExecutor` and the shell-based implementation
//! - `result` - result kinds, per-test results, aggregation
//! - `reporter` - console and JSON-lines reporters

pub mod executor;
pub mod reporter;
pub mod result;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use litmus_syntax::TestDirectives;
use tokio::sync::mpsc;

use crate::config::{EffectiveConfig, SubstitutionRule};
use crate::discovery::TestCase;
use crate::substitution::{SubstitutionEngine, TestPaths, engine_for_test, placeholder};
use crate::tools::ToolResolver;
use executor::{PipelineOutcome, RunCommand, RunRequest, TestExecutor};
use reporter::TestReporter;
use result::{ResultAggregator, ResultKind, RunSummary, TestResult};

/// Scheduling options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub workers: usize,
    /// Per-test timeout in seconds overriding the layers; `Some(0)` disables timeouts.
    pub timeout_override: Option<u64>,
    /// Stop claiming tests once this many have failed.
    pub max_failures: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_override: None,
            max_failures: None,
        }
    }
}

/// One worker per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Runs a list of tests on a worker pool.
pub struct TestRunner<E: TestExecutor> {
    executor: Arc<E>,
    config: RunnerConfig,
    abort: Arc<AtomicBool>,
}

impl<E: TestExecutor> TestRunner<E> {
    pub fn new(executor: E, config: RunnerConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops workers from claiming further tests when set.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Run every test and report each outcome as it completes.
    #[tracing::instrument(skip_all, fields(tests = cases.len(), workers = self.config.workers))]
    pub async fn run(&self, cases: Vec<TestCase>, reporter: &mut dyn TestReporter) -> RunSummary {
        let cases: Arc<[TestCase]> = cases.into();
        let mut aggregator = ResultAggregator::new();
        reporter.on_collection_complete(cases.len());

        let cursor = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<usize>();
        let workers = self.config.workers.clamp(1, cases.len().max(1));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let cases = Arc::clone(&cases);
            let cursor = Arc::clone(&cursor);
            let abort = Arc::clone(&self.abort);
            let executor = Arc::clone(&self.executor);
            let done_tx = done_tx.clone();
            let timeout_override = self.config.timeout_override;
            handles.push(tokio::spawn(async move {
                while !abort.load(Ordering::SeqCst) {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(case) = cases.get(index) else {
                        break;
                    };
                    let result = evaluate(case, executor.as_ref(), timeout_override).await;
                    case.set_result(result);
                    if done_tx.send(index).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(done_tx);

        let mut failures = 0usize;
        let mut stopped_on_failures = false;
        while let Some(index) = done_rx.recv().await {
            let case = &cases[index];
            let Some(result) = case.result() else {
                continue;
            };
            aggregator.record(result.kind);
            reporter.on_test_complete(case, result);

            if result.kind.is_failure() {
                failures += 1;
                if self.config.max_failures.is_some_and(|max| failures >= max) {
                    stopped_on_failures = true;
                    self.abort.store(true, Ordering::SeqCst);
                }
            }
        }

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(%err, "test worker panicked");
            }
        }

        // Anything left unclaimed was cut off by an abort (or a worker that died).
        let reason = if stopped_on_failures {
            format!("stopped after {failures} failures")
        } else {
            "run interrupted".to_string()
        };
        for case in cases.iter().filter(|c| c.result().is_none()) {
            case.set_result(TestResult::skipped(reason.clone()));
            if let Some(result) = case.result() {
                aggregator.record(result.kind);
                reporter.on_test_complete(case, result);
            }
        }

        let summary = aggregator.finish();
        reporter.on_run_complete(&summary);
        summary
    }
}

// ============================================================================
// Per-test evaluation
// ============================================================================

/// Take one test from claimed to terminal.
#[tracing::instrument(skip_all, fields(test = %case.name))]
pub async fn evaluate<E: TestExecutor>(case: &TestCase, executor: &E, timeout_override: Option<u64>) -> TestResult {
    let started = Instant::now();
    let result = evaluate_steps(case, executor, timeout_override).await;
    tracing::debug!(result = %result.kind, "test finished");
    result.with_elapsed(started.elapsed())
}

async fn evaluate_steps<E: TestExecutor>(case: &TestCase, executor: &E, timeout_override: Option<u64>) -> TestResult {
    let config = case.config.as_ref();
    let directives = match &case.directives {
        Ok(directives) => directives,
        Err(problem) => return TestResult::unresolved(problem.to_string()),
    };

    let on_platform = |ident: &str| config.matches_platform(ident);
    if config.unsupported {
        return TestResult::unsupported("directory is marked unsupported");
    }
    if let Some(expr) = directives.unsupported_match(on_platform) {
        return TestResult::unsupported(format!("UNSUPPORTED: {expr}"));
    }

    let missing = directives.missing_features(|feature| config.has_feature(feature));
    if !missing.is_empty() {
        return TestResult::skipped(format!("missing features: {}", missing.join(", ")));
    }

    if directives.run_lines.is_empty() {
        return TestResult::unresolved("test has no RUN: lines");
    }

    let request = match prepare(case, directives, timeout_override) {
        Ok(request) => request,
        Err(reason) => return TestResult::unresolved(reason),
    };

    let report = match executor.run_pipeline(request).await {
        Ok(report) => report,
        Err(err) => return TestResult::unresolved(err.to_string()),
    };

    let xfail = directives.xfail_match(on_platform);
    let result = match (report.outcome, xfail) {
        (PipelineOutcome::TimedOut, _) => TestResult::new(ResultKind::Timeout).with_reason("deadline exceeded"),
        (PipelineOutcome::Interrupted, _) => TestResult::unresolved("interrupted"),
        (PipelineOutcome::Failed, Some(expr)) => TestResult::new(ResultKind::XFail).with_reason(format!("XFAIL: {expr}")),
        (PipelineOutcome::Failed, None) => TestResult::new(ResultKind::Fail),
        (PipelineOutcome::Passed, Some(expr)) => {
            TestResult::new(ResultKind::XPass).with_reason(format!("expected to fail (XFAIL: {expr})"))
        }
        (PipelineOutcome::Passed, None) => TestResult::new(ResultKind::Pass),
    };
    result.with_runs(report.runs)
}

/// Substitute every run-line and assemble the subprocess request.
fn prepare(case: &TestCase, directives: &TestDirectives, timeout_override: Option<u64>) -> Result<RunRequest, String> {
    let config = case.config.as_ref();
    let paths = TestPaths::new(&case.path, &case.relative, &config.exec_root);
    let engine = test_engine(config, directives, &paths)?;

    let commands = directives
        .run_lines
        .iter()
        .map(|line| {
            engine
                .substitute(&line.command)
                .map(|command| RunCommand {
                    command,
                    propagate_failure: line.propagate_failure,
                })
                .map_err(|err| format!("line {}: {err}", line.line))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let timeout = timeout_override
        .or(config.timeout_secs)
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs);

    Ok(RunRequest {
        commands,
        shell: config.shell.clone(),
        cwd: paths.temp_dir,
        env: config.env.clone(),
        timeout,
    })
}

/// Engine for one test, with the tools and libraries its run-lines mention resolved.
fn test_engine(
    config: &EffectiveConfig,
    directives: &TestDirectives,
    paths: &TestPaths,
) -> Result<SubstitutionEngine, String> {
    let mentions = |name: &str| {
        let token = placeholder(name);
        directives.run_lines.iter().any(|line| line.command.contains(&token))
    };

    let resolver = ToolResolver::for_config(config);
    let mut resolved = Vec::new();
    for tool in config.tools.iter().filter(|t| mentions(t)) {
        let path = resolver.resolve_tool(tool).map_err(|err| err.to_string())?;
        resolved.push(SubstitutionRule::new(placeholder(tool), path.display().to_string()));
    }
    for library in config.libraries.iter().filter(|l| mentions(l)) {
        let path = resolver.resolve_library(library).map_err(|err| err.to_string())?;
        resolved.push(SubstitutionRule::new(placeholder(library), path.display().to_string()));
    }

    Ok(engine_for_test(config, resolved, paths))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use litmus_syntax::parse_directives;

    use super::*;
    use crate::config::{ConfigLayer, flatten};
    use executor::{ExecError, PipelineReport};
    use result::RunLineOutput;

    /// Pretends to run commands: a line containing `fail` fails, `hang` times out, `killed` is
    /// interrupted.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: AtomicUsize,
        seen: Mutex<Vec<RunRequest>>,
    }

    impl TestExecutor for ScriptedExecutor {
        async fn run_pipeline(&self, request: RunRequest) -> Result<PipelineReport, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            let mut runs = Vec::new();
            let mut outcome = PipelineOutcome::Passed;
            for line in &request.commands {
                tokio::task::yield_now().await;
                let stopped = if line.command.contains("hang") {
                    Some(PipelineOutcome::TimedOut)
                } else if line.command.contains("killed") {
                    Some(PipelineOutcome::Interrupted)
                } else {
                    None
                };
                if let Some(stopped) = stopped {
                    runs.push(RunLineOutput {
                        command: line.command.clone(),
                        ..Default::default()
                    });
                    outcome = stopped;
                    break;
                }
                let code = if line.command.contains("fail") { 1 } else { 0 };
                runs.push(RunLineOutput {
                    command: line.command.clone(),
                    exit_code: Some(code),
                    ..Default::default()
                });
                if code != 0 && line.propagate_failure {
                    outcome = PipelineOutcome::Failed;
                    break;
                }
            }
            Ok(PipelineReport { outcome, runs })
        }
    }

    fn config() -> Arc<EffectiveConfig> {
        let mut layer = ConfigLayer::new("/suite/litmus.toml")
            .with_features(["shell", "x86"])
            .with_substitution("%echo", "echo");
        layer.target = Some("x86_64-unknown-linux-gnu".into());
        Arc::new(flatten(&[&layer]))
    }

    fn case_with(name: &str, text: &str, config: Arc<EffectiveConfig>) -> TestCase {
        let directives = parse_directives(text).map_err(crate::discovery::DirectiveProblem::Malformed);
        TestCase::new(PathBuf::from("/suite").join(name), PathBuf::from(name), config, directives)
    }

    fn case(name: &str, text: &str) -> TestCase {
        case_with(name, text, config())
    }

    async fn eval(text: &str) -> (TestResult, usize) {
        let executor = ScriptedExecutor::default();
        let result = evaluate(&case("t.ll", text), &executor, None).await;
        (result, executor.calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_pass_and_fail() {
        assert_eq!(eval("RUN: %echo ok\n").await.0.kind, ResultKind::Pass);
        assert_eq!(eval("RUN: fail\nRUN: echo later\n").await.0.kind, ResultKind::Fail);
    }

    #[tokio::test]
    async fn test_missing_feature_skips_without_running() {
        let (result, calls) = eval("REQUIRES: asan\nRUN: %echo\n").await;
        assert_eq!(result.kind, ResultKind::Skipped);
        assert_eq!(result.reason.as_deref(), Some("missing features: asan"));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_xfail_always() {
        assert_eq!(eval("XFAIL: always\nRUN: fail\n").await.0.kind, ResultKind::XFail);
        assert_eq!(eval("XFAIL: *\nRUN: true\n").await.0.kind, ResultKind::XPass);
    }

    #[tokio::test]
    async fn test_xfail_on_target_fragment() {
        assert_eq!(eval("XFAIL: linux\nRUN: fail\n").await.0.kind, ResultKind::XFail);
        assert_eq!(eval("XFAIL: darwin\nRUN: fail\n").await.0.kind, ResultKind::Fail);
    }

    #[tokio::test]
    async fn test_unsupported_wins_over_requires_and_xfail() {
        let (result, calls) = eval("UNSUPPORTED: x86\nREQUIRES: asan\nXFAIL: *\nRUN: true\n").await;
        assert_eq!(result.kind, ResultKind::Unsupported);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_unsupported_directory() {
        let mut layer = ConfigLayer::new("/suite/litmus.toml");
        layer.unsupported = Some(true);
        let executor = ScriptedExecutor::default();
        let result = evaluate(&case_with("t.ll", "RUN: true\n", Arc::new(flatten(&[&layer]))), &executor, None).await;
        assert_eq!(result.kind, ResultKind::Unsupported);
    }

    #[tokio::test]
    async fn test_unresolved_cases() {
        assert_eq!(eval("REQUIRES: shell\n").await.0.kind, ResultKind::Unresolved);
        assert_eq!(eval("REQUIRES: (shell\nRUN: true\n").await.0.kind, ResultKind::Unresolved);
        let (result, calls) = eval("RUN: echo %{broken\n").await;
        assert_eq!(result.kind, ResultKind::Unresolved);
        assert!(result.reason.unwrap_or_default().contains("`%{broken`"));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_missing_referenced_tool_is_unresolved() {
        let mut layer = ConfigLayer::new("/suite/litmus.toml");
        layer.tools = vec!["opt".into(), "llc".into()];
        let config = Arc::new(flatten(&[&layer]));
        let executor = ScriptedExecutor::default();

        let uses_opt = case_with("a.ll", "RUN: %{opt} %s\n", Arc::clone(&config));
        let result = evaluate(&uses_opt, &executor, None).await;
        assert_eq!(result.kind, ResultKind::Unresolved);
        assert!(result.reason.unwrap_or_default().contains("tool `opt` not found"));

        // Tools that are not mentioned are never looked up.
        let plain = case_with("b.ll", "RUN: true\n", config);
        assert_eq!(evaluate(&plain, &executor, None).await.kind, ResultKind::Pass);
    }

    #[tokio::test]
    async fn test_library_placeholder_resolves() {
        let tmp = tempfile::tempdir().unwrap();
        let mut layer = ConfigLayer::new("/suite/litmus.toml");
        layer.libraries = vec!["plugin".into()];
        layer.library_dirs = vec![tmp.path().to_path_buf()];
        let config = Arc::new(flatten(&[&layer]));
        let file_name = ToolResolver::for_config(&config).library_name("plugin");
        std::fs::write(tmp.path().join(&file_name), b"").unwrap();

        let executor = ScriptedExecutor::default();
        let case = case_with("a.ll", "RUN: opt -load %{plugin} %s\n", config);
        assert_eq!(evaluate(&case, &executor, None).await.kind, ResultKind::Pass);

        let seen = executor.seen.lock().unwrap();
        assert_eq!(
            seen[0].commands[0].command,
            format!("opt -load {} /suite/a.ll", tmp.path().join(file_name).display())
        );
    }

    #[tokio::test]
    async fn test_timeout_result() {
        let (result, _) = eval("RUN: hang\n").await;
        assert_eq!(result.kind, ResultKind::Timeout);
    }

    #[tokio::test]
    async fn test_killed_pipeline_is_unresolved() {
        let (result, _) = eval("XFAIL: *\nRUN: killed\n").await;
        assert_eq!(result.kind, ResultKind::Unresolved);
        assert_eq!(result.reason.as_deref(), Some("interrupted"));
        assert_eq!(result.runs.len(), 1);
    }

    #[tokio::test]
    async fn test_request_carries_substitutions_and_timeout() {
        let mut layer = ConfigLayer::new("/suite/litmus.toml").with_substitution("%echo", "echo");
        layer.timeout = Some(60);
        layer.exec_root = Some(PathBuf::from("/build"));
        layer.env.insert("LC_ALL".into(), "C".into());
        let executor = ScriptedExecutor::default();
        let case = case_with("dir/t.ll", "RUN: %echo %s > %t\nRUN: - fail\n", Arc::new(flatten(&[&layer])));
        evaluate(&case, &executor, Some(2)).await;

        let seen = executor.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.commands[0].command, "echo /suite/dir/t.ll > /build/Output/dir/t.ll.tmp");
        assert!(!request.commands[1].propagate_failure);
        assert_eq!(request.cwd, PathBuf::from("/build/Output/dir"));
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert_eq!(request.env["LC_ALL"], "C");
    }

    fn mixed_suite() -> Vec<TestCase> {
        let texts = [
            "RUN: true\n",
            "RUN: fail\n",
            "REQUIRES: asan\nRUN: true\n",
            "XFAIL: *\nRUN: fail\n",
            "XFAIL: *\nRUN: true\n",
            "UNSUPPORTED: x86\nRUN: true\n",
            "RUN: hang\n",
            "",
        ];
        (0..40)
            .map(|i| case(&format!("t{i:02}.ll"), texts[i % texts.len()]))
            .collect()
    }

    struct Collecting(Vec<(String, ResultKind)>);

    impl TestReporter for Collecting {
        fn on_test_complete(&mut self, test: &TestCase, result: &TestResult) {
            self.0.push((test.name.clone(), result.kind));
        }

        fn on_run_complete(&mut self, _summary: &RunSummary) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counts_do_not_depend_on_worker_count() {
        let mut baseline = None;
        for workers in [1, 3, 16] {
            let runner = TestRunner::new(
                ScriptedExecutor::default(),
                RunnerConfig {
                    workers,
                    ..RunnerConfig::default()
                },
            );
            let mut reporter = Collecting(Vec::new());
            let summary = runner.run(mixed_suite(), &mut reporter).await;
            assert_eq!(summary.total, 40);
            assert_eq!(reporter.0.len(), 40);
            assert!(!summary.success);
            assert!(summary.has_xpass);
            match &baseline {
                None => baseline = Some(summary.counts.clone()),
                Some(counts) => assert_eq!(&summary.counts, counts, "workers = {workers}"),
            }
        }
        let counts = baseline.unwrap();
        assert_eq!(counts[&ResultKind::Pass], 5);
        assert_eq!(counts[&ResultKind::Unresolved], 5);
    }

    #[tokio::test]
    async fn test_max_failures_skips_the_rest() {
        let cases: Vec<TestCase> = (0..6).map(|i| case(&format!("t{i}.ll"), "RUN: fail\n")).collect();
        let runner = TestRunner::new(
            ScriptedExecutor::default(),
            RunnerConfig {
                workers: 1,
                timeout_override: None,
                max_failures: Some(2),
            },
        );
        let mut reporter = Collecting(Vec::new());
        let summary = runner.run(cases, &mut reporter).await;
        // The test in flight when the limit is reached still finishes.
        assert_eq!(summary.total, 6);
        assert!(summary.count(ResultKind::Fail) >= 2);
        assert!(summary.count(ResultKind::Skipped) >= 1);
        assert_eq!(summary.count(ResultKind::Fail) + summary.count(ResultKind::Skipped), 6);
        assert_eq!(reporter.0.len(), 6);
        assert!(reporter.0.iter().skip_while(|(_, k)| *k == ResultKind::Fail).all(|(_, k)| *k == ResultKind::Skipped));
    }

    #[tokio::test]
    async fn test_preset_abort_runs_nothing() {
        let executor = ScriptedExecutor::default();
        let runner = TestRunner::new(executor, RunnerConfig::default());
        runner.abort_handle().store(true, Ordering::SeqCst);
        let mut reporter = Collecting(Vec::new());
        let summary = runner.run(mixed_suite(), &mut reporter).await;
        assert_eq!(summary.count(ResultKind::Skipped), 40);
        assert!(summary.success);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let runner = TestRunner::new(ScriptedExecutor::default(), RunnerConfig::default());
        let mut reporter = Collecting(Vec::new());
        let summary = runner.run(Vec::new(), &mut reporter).await;
        assert_eq!(summary.total, 0);
        assert!(summary.success);
    }
}
