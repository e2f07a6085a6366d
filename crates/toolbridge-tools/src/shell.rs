//! Platform shell detection and executable lookup.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Returns the shell program and its "run this string" flag.
///
/// - Windows: `("cmd", "/C")`
/// - Unix-like: the user's `$SHELL` if usable, else `/bin/sh`, with `-c`
#[must_use]
pub fn get_shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        UnixShell::current_shell().get_shell_command()
    }
}

/// Resolve an executable by name on the current PATH.
///
/// Absolute paths are accepted as-is when they point at a file.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() && path.is_file() {
        return Some(path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Short name of the shell family.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Zsh(_) => "zsh",
            Self::Bash(_) => "bash",
            Self::Sh(_) => "sh",
            Self::Other(_) => "other",
        }
    }

    /// Get the current shell from `$SHELL`.
    #[must_use]
    pub fn current_shell() -> Self {
        std::env::var("SHELL")
            .ok()
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .unwrap_or_else(|| Self::Sh(PathBuf::from("/bin/sh")))
    }

    /// Classify an absolute path to an existing shell binary.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name() {
            Some(n) if n == OsStr::new("zsh") => Self::Zsh(path_buf),
            Some(n) if n == OsStr::new("bash") => Self::Bash(path_buf),
            Some(n) if n == OsStr::new("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        })
    }

    /// Get shell command tuple.
    #[must_use]
    pub fn get_shell_command(&self) -> (String, &'static str) {
        (self.path().to_string_lossy().into_owned(), "-c")
    }
}
