//! Platform-specific path utilities.

use super::permissions::is_executable;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// File name of the Redis server executable.
///
/// # Platform Behavior
/// - **Linux/macOS**: `redis-server`
/// - **Windows**: `redis-server.exe`
pub fn server_binary_name() -> &'static str {
    #[cfg(windows)]
    {
        "redis-server.exe"
    }
    #[cfg(not(windows))]
    {
        "redis-server"
    }
}

/// Directories listed in a `PATH`-style variable value.
pub fn search_dirs(path_var: Option<&OsStr>) -> Vec<PathBuf> {
    path_var
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default()
}

/// Find the first executable called `name` in `dirs`.
pub fn find_executable_in(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Find an executable on the process `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    find_executable_in(name, &search_dirs(path_var.as_deref()))
}

/// Quote a path for a Redis config directive when needed.
///
/// Redis splits directive arguments on whitespace and starts a quoted section
/// at any `"` or `'`, even mid-token, so paths containing either get wrapped
/// in double quotes with backslashes and double quotes escaped.
pub fn config_path_value(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\'')
    {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        text.into_owned()
    }
}
