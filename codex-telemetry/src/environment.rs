//! One-shot environment snapshot captured when a session starts.
//!
//! Project-root detection walks upward looking for this ecosystem's own
//! markers (`Cargo.toml`/`Cargo.lock`), and only a small allowlist of
//! environment variables is captured rather than the full process
//! environment.

use codex_protocol::telemetry::Environment;

const PROJECT_MARKERS: &[&str] = &[".git", "Cargo.toml", "Cargo.lock"];
const RELEVANT_VARS: &[&str] = &["PATH", "HOME", "PWD", "VIRTUAL_ENV", "CONDA_DEFAULT_ENV"];

impl Environment {
    /// Best-effort capture of the current process's environment. Never
    /// fails: any individual piece that can't be determined is left at its
    /// default rather than aborting the whole snapshot, matching the
    /// reference's `@with_fallback_data` wrapping around this same method.
    pub fn capture() -> Self {
        let working_directory = std::env::current_dir().unwrap_or_default();
        let project_root = find_project_root(&working_directory);

        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .or_else(|_| std::env::var("LOGNAME"))
            .ok();

        let mut environment_variables = std::collections::HashMap::new();
        for var in RELEVANT_VARS {
            if let Ok(value) = std::env::var(var) {
                environment_variables.insert((*var).to_string(), value);
            }
        }

        Self {
            os_type: std::env::consts::OS.to_string(),
            os_version: os_release(),
            runtime_version: runtime_version(),
            working_directory: working_directory.display().to_string(),
            project_root: project_root.display().to_string(),
            user_name,
            timezone: local_timezone(),
            environment_variables,
        }
    }
}

/// Walk up from `start` looking for a project marker, returning `start`
/// unchanged if none is found rather than propagating an error.
fn find_project_root(start: &std::path::Path) -> std::path::PathBuf {
    let Ok(mut current) = start.canonicalize() else {
        return start.to_path_buf();
    };

    loop {
        if PROJECT_MARKERS.iter().any(|marker| current.join(marker).exists()) {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return start.to_path_buf(),
        }
    }
}

#[cfg(unix)]
fn os_release() -> String {
    nix::sys::utsname::uname()
        .map(|info| info.release().to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(not(unix))]
fn os_release() -> String {
    "unknown".to_string()
}

/// There is no interpreter version to report in a compiled binary; the
/// closest Rust-native analogue is the crate's own release version, which
/// at least pins telemetry output to a specific build.
fn runtime_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn local_timezone() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_never_panics_and_fills_os_type() {
        let env = Environment::capture();
        assert_eq!(env.os_type, std::env::consts::OS);
        assert!(!env.working_directory.is_empty());
    }

    #[test]
    fn project_root_falls_back_to_start_when_no_marker_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = find_project_root(dir.path());
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn project_root_finds_cargo_toml_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested);
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }
}
