//! Layer chains and their flattening into an [`EffectiveConfig`].
//!
//! ## Merge rules
//!
//! Walking the chain from the most specific layer (the leaf) to the root:
//!
//! - scalar settings (`name`, roots, `target`, `unsupported`, `shell`, `timeout`, platform
//!   naming, string/bool variables, environment entries): the first layer that sets the key wins
//! - ordered lists (`substitutions`, `suffixes`, `excludes`, `tool_dirs`, `library_dirs`,
//!   list variables): concatenated leaf first, so the most specific entry is consulted first
//!   while ancestor entries stay available as fallbacks
//! - sets (`features`, `tools`, `required_tools`, `libraries`): unions
//!
//! Flattening is a pure function of the chain; no filesystem access happens here.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{ConfigError, ConfigLayer, SubstitutionRule, Value};

/// Host defaults for the platform naming conventions, used only when no layer sets them.
#[cfg(windows)]
const HOST_NAMING: (&str, &str, &str) = (".exe", "", ".dll");
#[cfg(target_os = "macos")]
const HOST_NAMING: (&str, &str, &str) = ("", "lib", ".dylib");
#[cfg(not(any(windows, target_os = "macos")))]
const HOST_NAMING: (&str, &str, &str) = ("", "lib", ".so");

#[cfg(windows)]
fn default_shell() -> Vec<String> {
    vec!["cmd".to_string(), "/C".to_string()]
}

#[cfg(not(windows))]
fn default_shell() -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string()]
}

/// Resolved platform naming conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub exe_suffix: String,
    pub shlib_prefix: String,
    pub shlib_ext: String,
}

/// The flattened, immutable configuration in effect for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    /// Scopes this config was built from, leaf first.
    pub chain: Vec<PathBuf>,
    pub name: String,
    pub source_root: PathBuf,
    pub exec_root: PathBuf,
    pub target: Option<String>,
    pub unsupported: bool,
    pub shell: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub platform: Platform,
    pub vars: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub substitutions: Vec<SubstitutionRule>,
    pub suffixes: Vec<String>,
    pub excludes: Vec<String>,
    pub features: BTreeSet<String>,
    pub tools: BTreeSet<String>,
    pub required_tools: BTreeSet<String>,
    pub libraries: BTreeSet<String>,
    pub tool_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
}

impl EffectiveConfig {
    /// Scope of the most specific layer.
    pub fn leaf_scope(&self) -> &Path {
        self.chain.first().map_or(Path::new(""), PathBuf::as_path)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Whether an `XFAIL:`/`UNSUPPORTED:` identifier holds: a known feature, or a fragment
    /// of the target triple.
    pub fn matches_platform(&self, ident: &str) -> bool {
        self.has_feature(ident) || self.target.as_deref().is_some_and(|t| t.contains(ident))
    }

    /// Whether `file_name` carries one of the configured test suffixes.
    pub fn is_test_name(&self, file_name: &str) -> bool {
        self.suffixes.iter().any(|s| file_name.ends_with(s.as_str()))
    }

    /// Whether any segment of `relative` (a path under the source root) is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        relative
            .components()
            .any(|c| self.excludes.iter().any(|e| c.as_os_str() == e.as_str()))
    }
}

/// Append `items` to `out`, skipping values already present.
fn append_unique<T: Clone + PartialEq>(out: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
}

fn first_set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

/// Flatten a chain of layers, given leaf first, into one effective configuration.
///
/// ## Notes
/// - The chain must be non-empty and acyclic; [`ConfigCascade::chain`] guarantees both.
/// - An empty chain yields a config with host defaults and empty roots.
pub fn flatten(chain: &[&ConfigLayer]) -> EffectiveConfig {
    let mut name = None;
    let mut source_root = None;
    let mut exec_root = None;
    let mut target = None;
    let mut unsupported = None;
    let mut shell = None;
    let mut timeout = None;
    let mut exe_suffix = None;
    let mut shlib_prefix = None;
    let mut shlib_ext = None;

    let mut vars: BTreeMap<String, Value> = BTreeMap::new();
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    let mut substitutions = Vec::new();
    let mut suffixes = Vec::new();
    let mut excludes = Vec::new();
    let mut tool_dirs = Vec::new();
    let mut library_dirs = Vec::new();
    let mut features = BTreeSet::new();
    let mut tools = BTreeSet::new();
    let mut required_tools = BTreeSet::new();
    let mut libraries = BTreeSet::new();

    for layer in chain {
        first_set(&mut name, &layer.name);
        first_set(&mut source_root, &layer.source_root);
        first_set(&mut exec_root, &layer.exec_root);
        first_set(&mut target, &layer.target);
        first_set(&mut unsupported, &layer.unsupported);
        first_set(&mut shell, &layer.shell);
        first_set(&mut timeout, &layer.timeout);
        first_set(&mut exe_suffix, &layer.platform.exe_suffix);
        first_set(&mut shlib_prefix, &layer.platform.shlib_prefix);
        first_set(&mut shlib_ext, &layer.platform.shlib_ext);

        for (key, value) in &layer.vars {
            match (vars.get_mut(key), value) {
                (None, _) => {
                    vars.insert(key.clone(), value.clone());
                }
                (Some(Value::List(child)), Value::List(parent)) => append_unique(child, parent),
                // A more specific layer already set this key.
                (Some(_), _) => {}
            }
        }
        for (key, value) in &layer.env {
            env.entry(key.clone()).or_insert_with(|| value.clone());
        }

        substitutions.extend(layer.substitutions.iter().cloned());
        append_unique(&mut suffixes, &layer.suffixes);
        append_unique(&mut excludes, &layer.excludes);
        append_unique(&mut tool_dirs, &layer.tool_dirs);
        append_unique(&mut library_dirs, &layer.library_dirs);
        features.extend(layer.features.iter().cloned());
        tools.extend(layer.tools.iter().cloned());
        required_tools.extend(layer.required_tools.iter().cloned());
        libraries.extend(layer.libraries.iter().cloned());
    }

    // Roots default to the directory of the root-most layer: the suite layer sits with its tests.
    let root_dir = chain.last().map(|l| l.dir().to_path_buf()).unwrap_or_default();
    let source_root = source_root.unwrap_or(root_dir);
    let exec_root = exec_root.unwrap_or_else(|| source_root.clone());
    let name = name.unwrap_or_else(|| {
        source_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "suite".to_string())
    });

    EffectiveConfig {
        chain: chain.iter().map(|l| l.scope.clone()).collect(),
        name,
        source_root,
        exec_root,
        target,
        unsupported: unsupported.unwrap_or(false),
        shell: shell.filter(|s| !s.is_empty()).unwrap_or_else(default_shell),
        timeout_secs: timeout.filter(|&t| t > 0),
        platform: Platform {
            exe_suffix: exe_suffix.unwrap_or_else(|| HOST_NAMING.0.to_string()),
            shlib_prefix: shlib_prefix.unwrap_or_else(|| HOST_NAMING.1.to_string()),
            shlib_ext: shlib_ext.unwrap_or_else(|| HOST_NAMING.2.to_string()),
        },
        vars,
        env,
        substitutions,
        suffixes,
        excludes,
        features,
        tools,
        required_tools,
        libraries,
        tool_dirs,
        library_dirs,
    }
}

/// The set of loaded layers, keyed by scope.
///
/// Parent links are scope keys, so the cascade owns every layer and the links are plain lookups.
#[derive(Debug, Clone, Default)]
pub struct ConfigCascade {
    layers: BTreeMap<PathBuf, ConfigLayer>,
}

impl ConfigCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer, replacing any layer with the same scope.
    pub fn insert(&mut self, layer: ConfigLayer) {
        self.layers.insert(layer.scope.clone(), layer);
    }

    pub fn contains(&self, scope: &Path) -> bool {
        self.layers.contains_key(scope)
    }

    /// The chain of layers from `scope` up to its root, leaf first.
    ///
    /// ## Errors
    /// - [`ConfigError::UnknownLayer`] if `scope` itself was never inserted
    /// - [`ConfigError::MissingParent`] if a parent link points at an absent layer
    /// - [`ConfigError::Cycle`] if the walk revisits a scope
    pub fn chain(&self, scope: &Path) -> Result<Vec<&ConfigLayer>, ConfigError> {
        let first = self.layers.get(scope).ok_or_else(|| ConfigError::UnknownLayer {
            scope: scope.to_path_buf(),
        })?;

        let mut seen: HashSet<&Path> = HashSet::new();
        let mut chain = Vec::new();
        let mut current = first;
        loop {
            if !seen.insert(current.scope.as_path()) {
                return Err(ConfigError::Cycle {
                    scope: current.scope.clone(),
                });
            }
            chain.push(current);
            let Some(parent) = &current.parent else {
                break;
            };
            current = self.layers.get(parent).ok_or_else(|| ConfigError::MissingParent {
                child: current.scope.clone(),
                parent: parent.clone(),
            })?;
        }
        Ok(chain)
    }

    /// Resolve the effective configuration for `scope`.
    ///
    /// ## Errors
    /// Propagates the chain errors described on [`ConfigCascade::chain`].
    #[tracing::instrument(skip(self), fields(scope = %scope.display()))]
    pub fn resolve(&self, scope: &Path) -> Result<EffectiveConfig, ConfigError> {
        let chain = self.chain(scope)?;
        tracing::debug!(depth = chain.len(), "flattening config chain");
        Ok(flatten(&chain))
    }
}
