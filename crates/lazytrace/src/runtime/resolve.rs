//! CommonJS-style path resolution.
//!
//! Paths are handled lexically: `.` and `..` are folded without touching
//! the filesystem, so module cache keys and matcher input agree with what
//! the user wrote.

use crate::result::{TraceError, TraceResult};
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Deserialize)]
struct PackageManifest {
    main: Option<String>,
}

/// Fold `.` and `..` components without consulting the filesystem
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make `path` absolute against the working directory, then normalize
///
/// # Errors
///
/// Returns an I/O error if the working directory is unavailable.
pub fn absolutize(path: &Path) -> TraceResult<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir()?;
    Ok(normalize(&cwd.join(path)))
}

fn is_relative_request(request: &str) -> bool {
    request == "."
        || request == ".."
        || request.starts_with("./")
        || request.starts_with("../")
        || request.starts_with('/')
}

/// Resolve a `require` request made from a module in `from_dir`
///
/// # Errors
///
/// Returns [`TraceError::Resolution`] if no file satisfies the request.
pub fn resolve_request(request: &str, from_dir: &Path) -> TraceResult<PathBuf> {
    if is_relative_request(request) {
        let candidate = normalize(&from_dir.join(request));
        return load_as_file(&candidate)
            .or_else(|| load_as_directory(&candidate))
            .ok_or_else(|| TraceError::resolution(request, from_dir));
    }
    resolve_package(request, from_dir).ok_or_else(|| TraceError::resolution(request, from_dir))
}

fn resolve_package(request: &str, from_dir: &Path) -> Option<PathBuf> {
    from_dir
        .ancestors()
        .filter(|dir| !dir.ends_with("node_modules"))
        .map(|dir| dir.join("node_modules").join(request))
        .find_map(|candidate| load_as_file(&candidate).or_else(|| load_as_directory(&candidate)))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn load_as_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    [".js", ".json"]
        .iter()
        .map(|suffix| with_suffix(path, suffix))
        .find(|p| p.is_file())
}

fn load_as_directory(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    let manifest = dir.join("package.json");
    if let Ok(text) = fs::read_to_string(&manifest) {
        if let Ok(PackageManifest { main: Some(main) }) = serde_json::from_str(&text) {
            let entry = normalize(&dir.join(main));
            if let Some(found) = load_as_file(&entry).or_else(|| index_of(&entry)) {
                return Some(found);
            }
        }
    }
    index_of(dir)
}

fn index_of(dir: &Path) -> Option<PathBuf> {
    ["index.js", "index.json"]
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Resolve the program to trace: a path first, then a `PATH` lookup
///
/// # Errors
///
/// Returns [`TraceError::Resolution`] if the target is neither an existing
/// file nor an executable name on `PATH`.
pub fn resolve_target(target: &str, cwd: &Path) -> TraceResult<PathBuf> {
    let direct = normalize(&cwd.join(target));
    if direct.is_file() {
        return Ok(direct);
    }
    if !target.contains('/') {
        if let Some(paths) = std::env::var_os("PATH") {
            if let Some(found) = std::env::split_paths(&paths)
                .map(|dir| dir.join(target))
                .find(|candidate| candidate.is_file())
            {
                return absolutize(&found);
            }
        }
    }
    Err(TraceError::resolution(target, cwd))
}

/// Resolve a post-require hook: a file relative to `cwd` first, then an
/// installed package
///
/// # Errors
///
/// Returns [`TraceError::Resolution`] if neither lookup finds the hook.
pub fn resolve_hook_module(request: &str, cwd: &Path) -> TraceResult<PathBuf> {
    let as_file = normalize(&cwd.join(request));
    load_as_file(&as_file)
        .or_else(|| load_as_directory(&as_file))
        .or_else(|| resolve_package(request, cwd))
        .ok_or_else(|| TraceError::resolution(request, cwd))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, text: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c.js")), PathBuf::from("/a/c.js"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_relative_request_with_extension_probing() {
        let tmp = TempDir::new().unwrap();
        let b = touch(tmp.path(), "lib/b.js", "");
        touch(tmp.path(), "lib/data.json", "{}");
        let from = tmp.path().join("lib");
        assert_eq!(resolve_request("./b", &from).unwrap(), b);
        assert_eq!(resolve_request("./b.js", &from).unwrap(), b);
        assert!(resolve_request("./data", &from).unwrap().ends_with("data.json"));
    }

    #[test]
    fn test_directory_index_and_package_main() {
        let tmp = TempDir::new().unwrap();
        let index = touch(tmp.path(), "util/index.js", "");
        touch(tmp.path(), "node_modules/pkg/package.json", r#"{"main": "lib/entry"}"#);
        let entry = touch(tmp.path(), "node_modules/pkg/lib/entry.js", "");
        let from = tmp.path().join("src/deep");
        fs::create_dir_all(&from).unwrap();

        assert_eq!(resolve_request("../../util", &from).unwrap(), index);
        assert_eq!(resolve_request("pkg", &from).unwrap(), entry);
    }

    #[test]
    fn test_missing_module_is_resolution_error() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_request("./nope", tmp.path()).unwrap_err();
        assert!(matches!(err, TraceError::Resolution { ref request, .. } if request == "./nope"));
        assert!(resolve_request("left-pad", tmp.path()).is_err());
    }

    #[test]
    fn test_target_resolution() {
        let tmp = TempDir::new().unwrap();
        let main = touch(tmp.path(), "main.js", "");
        assert_eq!(resolve_target("main.js", tmp.path()).unwrap(), main);
        assert!(resolve_target("definitely-not-a-command-xyz", tmp.path()).is_err());
    }

    #[test]
    fn test_hook_module_prefers_file() {
        let tmp = TempDir::new().unwrap();
        let local = touch(tmp.path(), "hook.js", "");
        touch(tmp.path(), "node_modules/hook.js/index.js", "");
        assert_eq!(resolve_hook_module("hook.js", tmp.path()).unwrap(), local);

        let pkg = touch(tmp.path(), "node_modules/my-hook/index.js", "");
        assert_eq!(resolve_hook_module("my-hook", tmp.path()).unwrap(), pkg);
    }
}
