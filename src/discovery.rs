//! Test discovery.
//!
//! Walks the suite's source root depth-first over sorted directory listings, so tests come out
//! in component-wise path order. A directory holding a `litmus.local.toml` opens a nested layer
//! whose parent (unless it names one) is the layer in effect for the enclosing directory; tests
//! below it see the re-resolved configuration.
//!
//! The walk is lazy. [`TestDiscovery`] owns its own copy of the cascade, so nested layers found
//! during one walk never leak into another.
//!
//! Symlinked directories are followed, but each real directory is walked at most once: a link
//! back to an ancestor, or to a directory already seen, is skipped.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use litmus_syntax::{DirectiveError, TestDirectives, parse_directives};
use regex::Regex;

use crate::config::loader::scope_key;
use crate::config::{ConfigCascade, ConfigError, EffectiveConfig, LAYER_FILE, LOCAL_LAYER_FILE, load_chain, load_layer};
use crate::runner::result::TestResult;
use crate::tools::ToolResolver;

// ============================================================================
// Test cases
// ============================================================================

/// Why a test's directives are unusable.
#[derive(Debug)]
pub enum DirectiveProblem {
    Unreadable(std::io::Error),
    Malformed(Vec<DirectiveError>),
}

impl fmt::Display for DirectiveProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveProblem::Unreadable(err) => write!(f, "cannot read test file: {err}"),
            DirectiveProblem::Malformed(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "malformed directives: {}", messages.join("; "))
            }
        }
    }
}

/// A discovered test file, annotated with its configuration and directives.
#[derive(Debug)]
pub struct TestCase {
    pub path: PathBuf,
    /// Path relative to the source root.
    pub relative: PathBuf,
    /// `/`-separated relative path used in reports and by `--filter`.
    pub name: String,
    pub config: Arc<EffectiveConfig>,
    pub directives: Result<TestDirectives, DirectiveProblem>,
    result: OnceLock<TestResult>,
}

impl TestCase {
    pub fn new(
        path: PathBuf,
        relative: PathBuf,
        config: Arc<EffectiveConfig>,
        directives: Result<TestDirectives, DirectiveProblem>,
    ) -> Self {
        let name = display_name(&relative);
        Self {
            path,
            relative,
            name,
            config,
            directives,
            result: OnceLock::new(),
        }
    }

    /// Read and parse the directives of the test at `path`.
    pub fn load(path: PathBuf, relative: PathBuf, config: Arc<EffectiveConfig>) -> Self {
        let directives = match std::fs::read(&path) {
            Ok(bytes) => parse_directives(&String::from_utf8_lossy(&bytes)).map_err(DirectiveProblem::Malformed),
            Err(err) => Err(DirectiveProblem::Unreadable(err)),
        };
        Self::new(path, relative, config, directives)
    }

    pub fn result(&self) -> Option<&TestResult> {
        self.result.get()
    }

    /// Record the outcome. Returns false if a result was already recorded.
    pub fn set_result(&self, result: TestResult) -> bool {
        self.result.set(result).is_ok()
    }
}

fn display_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Walk
// ============================================================================

/// Restrictions on which tests a walk yields.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Files or directories to restrict to; empty means the whole suite.
    pub paths: Vec<PathBuf>,
    /// Pattern matched against test names.
    pub filter: Option<Regex>,
}

impl Selection {
    pub fn new(paths: Vec<PathBuf>, filter: Option<&str>) -> Result<Self, ConfigError> {
        let filter = filter.map(Regex::new).transpose().map_err(ConfigError::InvalidFilter)?;
        Ok(Self {
            paths: paths.iter().map(|p| scope_key(p)).collect(),
            filter,
        })
    }

    fn reaches_dir(&self, dir: &Path) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|p| p.starts_with(dir) || dir.starts_with(p))
    }

    fn covers_file(&self, file: &Path) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|p| file.starts_with(p))
    }

    fn names_file(&self, file: &Path) -> bool {
        self.paths.iter().any(|p| p == file)
    }

    fn accepts_name(&self, name: &str) -> bool {
        self.filter.as_ref().is_none_or(|re| re.is_match(name))
    }
}

struct Frame {
    entries: std::vec::IntoIter<PathBuf>,
    scope: PathBuf,
    config: Arc<EffectiveConfig>,
}

/// Lazy, ordered iterator over the tests of a suite.
///
/// Yields `Err` at most once, for a fatal configuration problem in a nested layer, and then ends.
pub struct TestDiscovery {
    cascade: ConfigCascade,
    source_root: PathBuf,
    selection: Selection,
    stack: Vec<Frame>,
    /// Canonical directories already entered.
    visited: HashSet<PathBuf>,
}

impl TestDiscovery {
    /// Start a walk at the source root of the configuration in effect for `entry`.
    ///
    /// ## Errors
    /// Chain resolution errors, a missing discovery-required tool, or an unreadable source root.
    #[tracing::instrument(skip(cascade, selection), fields(entry = %entry.display()))]
    pub fn new(cascade: &ConfigCascade, entry: &Path, selection: Selection) -> Result<Self, ConfigError> {
        let cascade = cascade.clone();
        let config = cascade.resolve(entry)?;
        check_required_tools(&config)?;
        let source_root = scope_key(&config.source_root);
        tracing::debug!(source_root = %source_root.display(), "starting discovery");

        let mut discovery = Self {
            cascade,
            source_root: source_root.clone(),
            selection,
            stack: Vec::new(),
            visited: HashSet::from([source_root.clone()]),
        };
        let frame = discovery.enter_dir(&source_root, entry.to_path_buf(), Arc::new(config))?;
        discovery.stack.push(frame);
        Ok(discovery)
    }

    /// Open `dir`, applying its nested layer if it has one.
    fn enter_dir(
        &mut self,
        dir: &Path,
        scope: PathBuf,
        config: Arc<EffectiveConfig>,
    ) -> Result<Frame, ConfigError> {
        let (scope, config) = self.nested_layer(dir, scope, config)?;
        let entries = read_sorted(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Frame {
            entries: entries.into_iter(),
            scope,
            config,
        })
    }

    fn nested_layer(
        &mut self,
        dir: &Path,
        scope: PathBuf,
        config: Arc<EffectiveConfig>,
    ) -> Result<(PathBuf, Arc<EffectiveConfig>), ConfigError> {
        let local = dir.join(LOCAL_LAYER_FILE);
        if !local.is_file() {
            return Ok((scope, config));
        }

        let mut layer = load_layer(&local)?;
        let parent = layer.parent.get_or_insert_with(|| scope.clone()).clone();
        let local_scope = layer.scope.clone();
        self.cascade.insert(layer);
        if !self.cascade.contains(&parent) && parent.is_file() {
            load_chain(&mut self.cascade, &parent)?;
        }

        let resolved = self.cascade.resolve(&local_scope)?;
        check_required_tools(&resolved)?;
        tracing::debug!(layer = %local_scope.display(), "entered nested layer");
        Ok((local_scope, Arc::new(resolved)))
    }

    fn candidate(&self, path: PathBuf, relative: PathBuf, config: &Arc<EffectiveConfig>) -> Option<TestCase> {
        let file_name = path.file_name()?.to_string_lossy();
        let explicit = self.selection.names_file(&path);
        if !explicit && !config.is_test_name(&file_name) {
            return None;
        }
        if config.is_excluded(&relative) || !self.selection.covers_file(&path) {
            return None;
        }
        if !self.selection.accepts_name(&display_name(&relative)) {
            return None;
        }
        Some(TestCase::load(path, relative, Arc::clone(config)))
    }
}

impl Iterator for TestDiscovery {
    type Item = Result<TestCase, ConfigError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(path) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };
            let scope = frame.scope.clone();
            let config = Arc::clone(&frame.config);
            let Ok(relative) = path.strip_prefix(&self.source_root).map(Path::to_path_buf) else {
                continue;
            };

            if path.is_dir() {
                if config.is_excluded(&relative) || !self.selection.reaches_dir(&path) {
                    continue;
                }
                if !self.visited.insert(scope_key(&path)) {
                    tracing::debug!(dir = %path.display(), "directory already walked");
                    continue;
                }
                match self.enter_dir(&path, scope, config) {
                    Ok(frame) => self.stack.push(frame),
                    Err(err) => {
                        self.stack.clear();
                        return Some(Err(err));
                    }
                }
                continue;
            }

            if let Some(case) = self.candidate(path, relative, &config) {
                return Some(Ok(case));
            }
        }
    }
}

/// Non-hidden entries of `dir` other than layer files, sorted by name.
fn read_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && name != LAYER_FILE && name != LOCAL_LAYER_FILE
        })
        .map(|entry| entry.path())
        .collect();
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

fn check_required_tools(config: &EffectiveConfig) -> Result<(), ConfigError> {
    let resolver = ToolResolver::for_config(config);
    for tool in &config.required_tools {
        resolver.resolve_tool(tool).map_err(|source| ConfigError::RequiredTool {
            scope: config.leaf_scope().to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Run a complete walk.
///
/// ## Errors
/// The first fatal configuration error met during the walk.
pub fn discover(cascade: &ConfigCascade, entry: &Path, selection: Selection) -> Result<Vec<TestCase>, ConfigError> {
    TestDiscovery::new(cascade, entry, selection)?.collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn suite(root: &Path) -> (ConfigCascade, PathBuf) {
        write(root, "litmus.toml", "suffixes = [\".t\"]\nexcludes = [\"Inputs\"]\n");
        let mut cascade = ConfigCascade::new();
        let entry = load_chain(&mut cascade, &root.join(LAYER_FILE)).unwrap();
        (cascade, entry)
    }

    fn names(cases: &[TestCase]) -> Vec<&str> {
        cases.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_walk_is_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "b.t", "RUN: true\n");
        write(root, "a/z.t", "RUN: true\n");
        write(root, "a/b.t", "RUN: true\n");
        write(root, "a.t", "RUN: true\n");
        write(root, "notes.txt", "RUN: true\n");
        write(root, ".hidden/x.t", "RUN: true\n");
        write(root, "Inputs/helper.t", "RUN: true\n");
        write(root, "sub/Inputs/deep.t", "RUN: true\n");
        let (cascade, entry) = suite(root);

        let cases = discover(&cascade, &entry, Selection::default()).unwrap();
        assert_eq!(names(&cases), vec!["a/b.t", "a/z.t", "a.t", "b.t"]);
    }

    #[test]
    fn test_nested_layer_extends_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "top.t", "RUN: true\n");
        write(root, "c/litmus.local.toml", "suffixes = [\".c\"]\nfeatures = [\"clang\"]\n");
        write(root, "c/one.c", "RUN: true\n");
        write(root, "c/two.t", "RUN: true\n");
        write(root, "stray.c", "RUN: true\n");
        let (cascade, entry) = suite(root);

        let cases = discover(&cascade, &entry, Selection::default()).unwrap();
        assert_eq!(names(&cases), vec!["c/one.c", "c/two.t", "top.t"]);
        assert!(cases[0].config.has_feature("clang"));
        assert!(!cases[2].config.has_feature("clang"));
        assert_eq!(cases[0].config.chain.len(), 2);
        // The caller's cascade is untouched.
        assert!(!cascade.contains(&scope_key(&root.join("c").join(LOCAL_LAYER_FILE))));
    }

    #[test]
    fn test_nested_layer_explicit_parent_overrides_enclosing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "other/litmus.toml", "features = [\"other\"]\nsuffixes = [\".t\"]\n");
        write(root, "sub/litmus.local.toml", "parent = \"../other/litmus.toml\"\n");
        write(root, "sub/a.t", "RUN: true\n");
        let (cascade, entry) = suite(root);

        let cases = discover(&cascade, &entry, Selection::default()).unwrap();
        let sub = cases.iter().find(|c| c.name == "sub/a.t").unwrap();
        assert_eq!(sub.config.chain.len(), 2);
        assert_eq!(sub.config.chain[1], scope_key(&root.join("other").join(LAYER_FILE)));
        assert!(sub.config.has_feature("other"));
        // The enclosing suite layer is not in the chain, so its exclusions no longer apply.
        assert!(sub.config.excludes.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_walked_once() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "a/x.t", "RUN: true\n");
        std::os::unix::fs::symlink(root.join("a"), root.join("a/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("b")).unwrap();
        let (cascade, entry) = suite(root);

        let cases = discover(&cascade, &entry, Selection::default()).unwrap();
        assert_eq!(names(&cases), vec!["a/x.t"]);
    }

    #[test]
    fn test_nested_layer_parse_error_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "a.t", "RUN: true\n");
        write(root, "z/litmus.local.toml", "suffixes = 3\n");
        write(root, "z/b.t", "RUN: true\n");
        let (cascade, entry) = suite(root);

        let mut walk = TestDiscovery::new(&cascade, &entry, Selection::default()).unwrap();
        assert_eq!(walk.next().unwrap().unwrap().name, "a.t");
        assert!(matches!(walk.next(), Some(Err(ConfigError::Parse { .. }))));
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_selection_and_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "x/one.t", "RUN: true\n");
        write(root, "x/two.t", "RUN: true\n");
        write(root, "y/three.t", "RUN: true\n");
        write(root, "y/README", "RUN: true\n");
        let (cascade, entry) = suite(root);

        let only_x = Selection::new(vec![root.join("x")], None).unwrap();
        assert_eq!(names(&discover(&cascade, &entry, only_x).unwrap()), vec!["x/one.t", "x/two.t"]);

        let filtered = Selection::new(Vec::new(), Some("t[wh]")).unwrap();
        assert_eq!(names(&discover(&cascade, &entry, filtered).unwrap()), vec!["x/two.t", "y/three.t"]);

        let explicit = Selection::new(vec![root.join("y/README")], None).unwrap();
        assert_eq!(names(&discover(&cascade, &entry, explicit).unwrap()), vec!["y/README"]);
    }

    #[test]
    fn test_bad_filter_is_config_error() {
        assert!(matches!(Selection::new(Vec::new(), Some("(")), Err(ConfigError::InvalidFilter(_))));
    }

    #[test]
    fn test_directive_problems_are_attached() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "bad.t", "REQUIRES:\nRUN: true\n");
        let (cascade, entry) = suite(root);
        let cases = discover(&cascade, &entry, Selection::default()).unwrap();
        assert!(matches!(cases[0].directives, Err(DirectiveProblem::Malformed(_))));
    }

    #[test]
    fn test_result_slot_is_write_once() {
        let case = TestCase::new(
            PathBuf::from("/s/a.t"),
            PathBuf::from("a.t"),
            Arc::new(crate::config::flatten(&[])),
            Ok(TestDirectives::default()),
        );
        assert!(case.set_result(TestResult::skipped("first")));
        assert!(!case.set_result(TestResult::skipped("second")));
        assert_eq!(case.result().and_then(|r| r.reason.as_deref()), Some("first"));
    }

    #[test]
    fn test_missing_required_tool_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "litmus.toml", "suffixes = [\".t\"]\nrequired_tools = [\"FileCheck\"]\n");
        let mut cascade = ConfigCascade::new();
        let entry = load_chain(&mut cascade, &tmp.path().join(LAYER_FILE)).unwrap();
        assert!(matches!(
            TestDiscovery::new(&cascade, &entry, Selection::default()),
            Err(ConfigError::RequiredTool { .. })
        ));
    }
}
