//! End-to-end tests: real suites on disk, real subprocesses.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use litmus::config::{ConfigCascade, LAYER_FILE, load_chain};
use litmus::discovery::{Selection, discover};
use litmus::runner::executor::ShellExecutor;
use litmus::runner::reporter::TestReporter;
use litmus::runner::result::{ResultKind, RunSummary, TestResult};
use litmus::runner::{RunnerConfig, TestRunner};
use litmus::TestCase;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn write_tool(dir: &Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, ResultKind, Option<String>)>>>);

impl TestReporter for Recorder {
    fn on_test_complete(&mut self, test: &TestCase, result: &TestResult) {
        self.0
            .lock()
            .unwrap()
            .push((test.name.clone(), result.kind, result.reason.clone()));
    }

    fn on_run_complete(&mut self, _summary: &RunSummary) {}
}

impl Recorder {
    fn kind_of(&self, name: &str) -> ResultKind {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, k, _)| *k)
            .unwrap_or_else(|| panic!("no result for {name}"))
    }
}

fn load(entry: &Path) -> (ConfigCascade, PathBuf) {
    let mut cascade = ConfigCascade::new();
    let scope = load_chain(&mut cascade, entry).unwrap();
    (cascade, scope)
}

async fn run_suite(entry: &Path, config: RunnerConfig) -> (RunSummary, Recorder) {
    let (cascade, scope) = load(entry);
    let cases = discover(&cascade, &scope, Selection::default()).unwrap();
    let runner = TestRunner::new(ShellExecutor::new(), config);
    let mut recorder = Recorder::default();
    let summary = runner.run(cases, &mut recorder).await;
    (summary, recorder)
}

fn workers(n: usize) -> RunnerConfig {
    RunnerConfig {
        workers: n,
        ..RunnerConfig::default()
    }
}

/// A site layer in a build directory delegating to the suite layer in the source tree.
fn build_split_suite(root: &Path) -> PathBuf {
    let bin = root.join("build/bin");
    write_tool(&bin, "greet", "echo \"hello $1\"");
    write(
        root,
        "build/litmus.toml",
        r#"
parent = "../src/test/litmus.toml"
exec_root = "."
tool_dirs = ["bin"]
features = ["shell"]

[vars]
greeting = "hello"
"#,
    );
    write(
        root,
        "src/test/litmus.toml",
        r#"
name = "demo"
suffixes = [".test"]
excludes = ["Inputs"]
tools = ["greet"]

[[substitutions]]
pattern = "%check"
replacement = "grep -q"
"#,
    );
    write(
        root,
        "src/test/basic/pass.test",
        "# RUN: %{greet} world > %t\n# RUN: %check 'hello world' %t\n",
    );
    write(root, "src/test/basic/fail.test", "# RUN: %{greet} x | %check nope\n");
    write(root, "src/test/basic/var.test", "# RUN: test '%{var:greeting}' = hello\n");
    write(root, "src/test/needs.test", "# REQUIRES: asan\n# RUN: touch %S/should-not-exist\n");
    write(root, "src/test/xf.test", "# XFAIL: *\n# RUN: false\n");
    write(root, "src/test/xp.test", "# XFAIL: always\n# RUN: true\n");
    write(root, "src/test/Inputs/helper.test", "# RUN: false\n");
    root.join("build").join(LAYER_FILE)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_split_suite_results() {
    let tmp = tempfile::tempdir().unwrap();
    let entry = build_split_suite(tmp.path());
    let (summary, recorder) = run_suite(&entry, workers(4)).await;

    assert_eq!(summary.total, 6);
    assert_eq!(recorder.kind_of("basic/pass.test"), ResultKind::Pass);
    assert_eq!(recorder.kind_of("basic/fail.test"), ResultKind::Fail);
    assert_eq!(recorder.kind_of("basic/var.test"), ResultKind::Pass);
    assert_eq!(recorder.kind_of("needs.test"), ResultKind::Skipped);
    assert_eq!(recorder.kind_of("xf.test"), ResultKind::XFail);
    assert_eq!(recorder.kind_of("xp.test"), ResultKind::XPass);
    assert!(!summary.success);
    assert!(summary.has_xpass);

    // SKIPPED never spawned its command.
    assert!(!tmp.path().join("src/test/should-not-exist").exists());
    // Per-test outputs land under the exec root.
    assert!(tmp.path().join("build/Output/basic/pass.test.tmp").exists());
}

#[tokio::test]
async fn test_discovery_order_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let entry = build_split_suite(tmp.path());
    let (cascade, scope) = load(&entry);
    let names = |cases: Vec<TestCase>| cases.into_iter().map(|c| c.name).collect::<Vec<_>>();

    let first = names(discover(&cascade, &scope, Selection::default()).unwrap());
    let second = names(discover(&cascade, &scope, Selection::default()).unwrap());
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            "basic/fail.test",
            "basic/pass.test",
            "basic/var.test",
            "needs.test",
            "xf.test",
            "xp.test"
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counts_invariant_under_worker_count() {
    let tmp = tempfile::tempdir().unwrap();
    let entry = build_split_suite(tmp.path());

    let (one, _) = run_suite(&entry, workers(1)).await;
    let (many, _) = run_suite(&entry, workers(8)).await;
    assert_eq!(one.counts, many.counts);
    assert_eq!(one.success, many.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_does_not_block_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "litmus.toml", "suffixes = [\".test\"]\n");
    write(root, "slow.test", "RUN: sleep 10\n");
    write(root, "quick1.test", "RUN: true\n");
    write(root, "quick2.test", "RUN: echo fine\n");

    let started = Instant::now();
    let (summary, recorder) = run_suite(
        &root.join(LAYER_FILE),
        RunnerConfig {
            workers: 3,
            timeout_override: Some(2),
            max_failures: None,
        },
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(recorder.kind_of("slow.test"), ResultKind::Timeout);
    assert_eq!(recorder.kind_of("quick1.test"), ResultKind::Pass);
    assert_eq!(recorder.kind_of("quick2.test"), ResultKind::Pass);
    assert_eq!(summary.count(ResultKind::Timeout), 1);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
}

#[tokio::test]
async fn test_nested_layer_marks_directory_unsupported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "litmus.toml", "suffixes = [\".test\"]\n");
    write(root, "ok.test", "RUN: true\n");
    write(root, "win/litmus.local.toml", "unsupported = true\n");
    write(root, "win/a.test", "RUN: false\n");

    let (summary, recorder) = run_suite(&root.join(LAYER_FILE), workers(2)).await;
    assert_eq!(recorder.kind_of("win/a.test"), ResultKind::Unsupported);
    assert!(summary.success);
}

#[tokio::test]
async fn test_missing_referenced_tool_is_unresolved() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "litmus.toml", "suffixes = [\".test\"]\ntools = [\"nosuchtool\"]\n");
    write(root, "uses.test", "RUN: %{nosuchtool} --version\n");
    write(root, "plain.test", "RUN: true\n");

    let (_, recorder) = run_suite(&root.join(LAYER_FILE), workers(2)).await;
    assert_eq!(recorder.kind_of("uses.test"), ResultKind::Unresolved);
    assert_eq!(recorder.kind_of("plain.test"), ResultKind::Pass);
}
