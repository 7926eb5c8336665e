//! Reading layer files from disk.
//!
//! The loader knows nothing about inheritance beyond following `parent` keys to make sure every
//! ancestor of an entry layer is present in the cascade. Relative paths in a layer file are
//! anchored at the directory containing that file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ConfigCascade, ConfigError, ConfigLayer, PlatformNaming, SubstitutionRule, Value};

/// File name of an entry (site or suite) layer.
pub const LAYER_FILE: &str = "litmus.toml";
/// File name of a nested directory layer.
pub const LOCAL_LAYER_FILE: &str = "litmus.local.toml";

/// On-disk shape of a layer file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerFile {
    name: Option<String>,
    parent: Option<PathBuf>,
    source_root: Option<PathBuf>,
    exec_root: Option<PathBuf>,
    target: Option<String>,
    unsupported: Option<bool>,
    shell: Option<Vec<String>>,
    timeout: Option<u64>,
    #[serde(default)]
    platform: PlatformNaming,
    #[serde(default)]
    vars: BTreeMap<String, Value>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    substitutions: Vec<SubstitutionRule>,
    #[serde(default)]
    suffixes: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    required_tools: Vec<String>,
    #[serde(default)]
    libraries: Vec<String>,
    #[serde(default)]
    tool_dirs: Vec<PathBuf>,
    #[serde(default)]
    library_dirs: Vec<PathBuf>,
}

/// Canonical identity for a layer path.
///
/// Existing files are canonicalized so that two spellings of one file share a scope; paths that
/// do not exist are made absolute and kept as written.
pub fn scope_key(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

fn anchor(dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() { path } else { dir.join(path) }
}

/// Parse the text of a layer file whose identity is `scope`.
///
/// ## Errors
/// [`ConfigError::Parse`] for malformed TOML, unknown keys, or mistyped values.
pub fn parse_layer(scope: &Path, text: &str) -> Result<ConfigLayer, ConfigError> {
    let file: LayerFile = toml::from_str(text).map_err(|err| ConfigError::Parse {
        path: scope.to_path_buf(),
        message: err.message().to_string(),
    })?;

    let mut layer = ConfigLayer::new(scope);
    let dir = layer.dir().to_path_buf();

    layer.parent = file.parent.map(|p| scope_key(&anchor(&dir, p)));
    layer.name = file.name;
    layer.source_root = file.source_root.map(|p| anchor(&dir, p));
    layer.exec_root = file.exec_root.map(|p| anchor(&dir, p));
    layer.target = file.target;
    layer.unsupported = file.unsupported;
    layer.shell = file.shell;
    layer.timeout = file.timeout;
    layer.platform = file.platform;
    layer.vars = file.vars;
    layer.env = file.env;
    layer.substitutions = file.substitutions;
    layer.suffixes = file.suffixes;
    layer.excludes = file.excludes;
    layer.features = file.features;
    layer.tools = file.tools;
    layer.required_tools = file.required_tools;
    layer.libraries = file.libraries;
    layer.tool_dirs = file.tool_dirs.into_iter().map(|p| anchor(&dir, p)).collect();
    layer.library_dirs = file.library_dirs.into_iter().map(|p| anchor(&dir, p)).collect();
    Ok(layer)
}

/// Read and parse one layer file.
///
/// ## Errors
/// [`ConfigError::Io`] if the file cannot be read, otherwise as [`parse_layer`].
pub fn load_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let scope = scope_key(path);
    let text = std::fs::read_to_string(&scope).map_err(|source| ConfigError::Io {
        path: scope.clone(),
        source,
    })?;
    tracing::debug!(layer = %scope.display(), "loaded config layer");
    parse_layer(&scope, &text)
}

/// Load `entry` and every ancestor it names into `cascade`, returning the entry scope.
///
/// Loading stops at a layer that is already present or at a parent file that does not exist;
/// the latter is left for [`ConfigCascade::chain`] to report with both scopes named. A cycle of
/// `parent` keys terminates here because the first revisited layer is already loaded.
///
/// ## Errors
/// The first [`load_layer`] error for a file that exists.
#[tracing::instrument(skip(cascade), fields(entry = %entry.display()))]
pub fn load_chain(cascade: &mut ConfigCascade, entry: &Path) -> Result<PathBuf, ConfigError> {
    let entry_scope = scope_key(entry);
    let mut next = Some(entry_scope.clone());
    while let Some(scope) = next.take() {
        if cascade.contains(&scope) {
            break;
        }
        if scope != entry_scope && !scope.is_file() {
            break;
        }
        let layer = load_layer(&scope)?;
        next.clone_from(&layer.parent);
        cascade.insert(layer);
    }
    Ok(entry_scope)
}

/// Find the nearest [`LAYER_FILE`] at or above `start`.
///
/// ## Errors
/// [`ConfigError::NoEntryLayer`] if no directory up to the filesystem root holds one.
pub fn find_entry_layer(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = std::path::absolute(start).unwrap_or_else(|_| start.to_path_buf());
    let mut dir = if start.is_file() { start.parent() } else { Some(start.as_path()) };
    while let Some(current) = dir {
        let candidate = current.join(LAYER_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        dir = current.parent();
    }
    Err(ConfigError::NoEntryLayer {
        start,
        file: LAYER_FILE,
    })
}
