//! Configuration layers and their inheritance.
//!
//! A suite is configured by a chain of layers. The entry layer (usually produced by a build
//! system and holding installation facts such as tool directories) names a parent layer
//! (the suite layer, which says what a test is and how commands are built). Directories inside
//! the suite may add `litmus.local.toml` layers whose parent is the layer in effect for the
//! enclosing directory.
//!
//! ## Modules
//!
//! - `error` - `ConfigError`, the fatal configuration error taxonomy
//! - `cascade` - `ConfigCascade` and the pure flattening into `EffectiveConfig`
//! - `loader` - TOML layer files → `ConfigLayer`

pub mod cascade;
pub mod error;
pub mod loader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use cascade::{ConfigCascade, EffectiveConfig, Platform, flatten};
pub use error::ConfigError;
pub use loader::{LAYER_FILE, LOCAL_LAYER_FILE, find_entry_layer, load_chain, load_layer, parse_layer};

/// A configuration variable.
///
/// Lists are merged across layers (child entries first); booleans and strings are overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

impl Value {
    /// Text used when the variable is referenced as `%{var:NAME}`.
    pub fn as_substitution(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::List(items) => Some(items.join(PATH_LIST_SEPARATOR)),
            Value::Bool(_) => None,
        }
    }
}

/// Separator for path lists on the host platform.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// A literal `pattern` → `replacement` rewrite applied to run-lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub pattern: String,
    pub replacement: String,
}

impl SubstitutionRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Platform naming conventions for tools and shared libraries, as set by one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformNaming {
    pub exe_suffix: Option<String>,
    pub shlib_prefix: Option<String>,
    pub shlib_ext: Option<String>,
}

/// One configuration scope.
///
/// Every `Option` field is "unset" when `None` and then falls through to the parent chain.
/// List fields are merged with the parent's lists rather than replacing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    /// Identity of the layer: the path of the file it was read from.
    pub scope: PathBuf,
    /// Scope of the parent layer, if any.
    pub parent: Option<PathBuf>,
    pub name: Option<String>,
    pub source_root: Option<PathBuf>,
    pub exec_root: Option<PathBuf>,
    pub target: Option<String>,
    pub unsupported: Option<bool>,
    pub shell: Option<Vec<String>>,
    /// Per-test timeout in seconds; `0` disables the timeout.
    pub timeout: Option<u64>,
    pub platform: PlatformNaming,
    pub vars: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub substitutions: Vec<SubstitutionRule>,
    pub suffixes: Vec<String>,
    pub excludes: Vec<String>,
    pub features: Vec<String>,
    pub tools: Vec<String>,
    pub required_tools: Vec<String>,
    pub libraries: Vec<String>,
    pub tool_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
}

impl ConfigLayer {
    /// Create an empty layer for `scope`.
    pub fn new(scope: impl Into<PathBuf>) -> Self {
        Self {
            scope: scope.into(),
            parent: None,
            name: None,
            source_root: None,
            exec_root: None,
            target: None,
            unsupported: None,
            shell: None,
            timeout: None,
            platform: PlatformNaming::default(),
            vars: BTreeMap::new(),
            env: BTreeMap::new(),
            substitutions: Vec::new(),
            suffixes: Vec::new(),
            excludes: Vec::new(),
            features: Vec::new(),
            tools: Vec::new(),
            required_tools: Vec::new(),
            libraries: Vec::new(),
            tool_dirs: Vec::new(),
            library_dirs: Vec::new(),
        }
    }

    /// Directory containing the layer file; relative paths in the layer are anchored here.
    pub fn dir(&self) -> &Path {
        self.scope.parent().unwrap_or(Path::new("."))
    }

    pub fn with_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn with_substitution(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.substitutions.push(SubstitutionRule::new(pattern, replacement));
        self
    }

    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes.extend(suffixes.into_iter().map(Into::into));
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn with_tool_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.tool_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }
}
