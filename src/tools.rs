//! Tool and library lookup.
//!
//! A tool name is mapped to `<dir>/<name><exe_suffix>` for the first configured tool directory
//! holding such an executable; a library name to `<dir>/<shlib_prefix><name><shlib_ext>` over the
//! library directories. Lookup order is the order of the flattened search lists, so directories
//! from the most specific layer are probed first.

use std::fmt;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::config::{EffectiveConfig, Platform};

/// What kind of artifact a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Executable,
    Library,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Executable => write!(f, "tool"),
            ToolKind::Library => write!(f, "library"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{kind} `{name}` not found (searched: {})", searched_display(.searched))]
#[diagnostic(
    code(litmus::tools::not_found),
    help("add the directory holding it to `tool_dirs` or `library_dirs`")
)]
pub struct ToolNotFoundError {
    pub kind: ToolKind,
    pub name: String,
    pub searched: Vec<PathBuf>,
}

fn searched_display(dirs: &[PathBuf]) -> String {
    if dirs.is_empty() {
        return "no directories configured".to_string();
    }
    dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// Resolves symbolic names against one effective configuration.
#[derive(Debug, Clone)]
pub struct ToolResolver<'a> {
    tool_dirs: &'a [PathBuf],
    library_dirs: &'a [PathBuf],
    platform: &'a Platform,
}

impl<'a> ToolResolver<'a> {
    pub fn new(tool_dirs: &'a [PathBuf], library_dirs: &'a [PathBuf], platform: &'a Platform) -> Self {
        Self {
            tool_dirs,
            library_dirs,
            platform,
        }
    }

    pub fn for_config(config: &'a EffectiveConfig) -> Self {
        Self::new(&config.tool_dirs, &config.library_dirs, &config.platform)
    }

    /// File name a tool is expected to have on this platform.
    pub fn executable_name(&self, name: &str) -> String {
        format!("{name}{}", self.platform.exe_suffix)
    }

    /// File name a shared library is expected to have on this platform.
    pub fn library_name(&self, name: &str) -> String {
        format!("{}{name}{}", self.platform.shlib_prefix, self.platform.shlib_ext)
    }

    /// First executable named `name` in the tool directories.
    pub fn resolve_tool(&self, name: &str) -> Result<PathBuf, ToolNotFoundError> {
        let file_name = self.executable_name(name);
        probe(self.tool_dirs, &file_name, is_executable).ok_or_else(|| ToolNotFoundError {
            kind: ToolKind::Executable,
            name: name.to_string(),
            searched: self.tool_dirs.to_vec(),
        })
    }

    /// First shared library named `name` in the library directories.
    pub fn resolve_library(&self, name: &str) -> Result<PathBuf, ToolNotFoundError> {
        let file_name = self.library_name(name);
        probe(self.library_dirs, &file_name, Path::is_file).ok_or_else(|| ToolNotFoundError {
            kind: ToolKind::Library,
            name: name.to_string(),
            searched: self.library_dirs.to_vec(),
        })
    }
}

fn probe(dirs: &[PathBuf], file_name: &str, accept: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    dirs.iter().map(|dir| dir.join(file_name)).find(|candidate| {
        let hit = accept(candidate);
        tracing::trace!(candidate = %candidate.display(), hit, "probe");
        hit
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unix_platform() -> Platform {
        Platform {
            exe_suffix: String::new(),
            shlib_prefix: "lib".to_string(),
            shlib_ext: ".so".to_string(),
        }
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_first_directory_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        make_executable(&first.join("opt"));
        make_executable(&second.join("opt"));

        let platform = unix_platform();
        let dirs = vec![second.clone(), first.clone()];
        let resolver = ToolResolver::new(&dirs, &[], &platform);
        assert_eq!(resolver.resolve_tool("opt").unwrap(), second.join("opt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(plain.join("FileCheck"), "not a program").unwrap();
        make_executable(&bin.join("FileCheck"));

        let platform = unix_platform();
        let dirs = vec![plain, bin.clone()];
        let resolver = ToolResolver::new(&dirs, &[], &platform);
        assert_eq!(resolver.resolve_tool("FileCheck").unwrap(), bin.join("FileCheck"));
    }

    #[test]
    fn test_library_naming() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("libValueNumbering.so"), "").unwrap();

        let platform = unix_platform();
        let dirs = vec![tmp.path().to_path_buf()];
        let resolver = ToolResolver::new(&[], &dirs, &platform);
        assert_eq!(
            resolver.resolve_library("ValueNumbering").unwrap(),
            tmp.path().join("libValueNumbering.so")
        );
    }

    #[test]
    fn test_missing_tool_lists_searched_dirs() {
        let platform = unix_platform();
        let dirs = vec![PathBuf::from("/nonexistent/a"), PathBuf::from("/nonexistent/b")];
        let resolver = ToolResolver::new(&dirs, &[], &platform);
        let err = resolver.resolve_tool("opt").unwrap_err();
        assert_eq!(err.searched, dirs);
        assert_eq!(
            err.to_string(),
            "tool `opt` not found (searched: /nonexistent/a, /nonexistent/b)"
        );
    }

    #[test]
    fn test_missing_with_no_dirs() {
        let platform = unix_platform();
        let resolver = ToolResolver::new(&[], &[], &platform);
        let err = resolver.resolve_library("m").unwrap_err();
        assert_eq!(err.to_string(), "library `m` not found (searched: no directories configured)");
    }

    #[test]
    fn test_exe_suffix_applied() {
        let platform = Platform {
            exe_suffix: ".exe".to_string(),
            shlib_prefix: String::new(),
            shlib_ext: ".dll".to_string(),
        };
        let resolver = ToolResolver::new(&[], &[], &platform);
        assert_eq!(resolver.executable_name("opt"), "opt.exe");
        assert_eq!(resolver.library_name("Plugin"), "Plugin.dll");
    }
}
