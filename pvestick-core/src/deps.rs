//! Checks that the external tools the pipeline shells out to are installed.
use crate::platform::Platform;
use std::env;
use std::path::PathBuf;

/// Needed on every platform.
pub const REQUIRED_TOOLS: [&str; 3] = ["dd", "sudo", "sync"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub missing: Vec<String>,
    /// A command that installs the missing tools.
    pub install_hint: Option<String>,
}

impl DependencyReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Looks `tool` up on `PATH`.
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

pub fn check(platform: &dyn Platform) -> DependencyReport {
    check_with(platform, |tool| find_in_path(tool).is_some())
}

/// Like [`check`], with the presence test supplied by the caller.
pub fn check_with<F>(platform: &dyn Platform, is_present: F) -> DependencyReport
where
    F: Fn(&str) -> bool,
{
    let missing: Vec<String> = REQUIRED_TOOLS
        .iter()
        .chain(platform.required_tools())
        .copied()
        .filter(|&tool| !is_present(tool))
        .map(|tool| tool.to_string())
        .collect();

    for tool in &missing {
        log::debug!("{tool} not found on PATH");
    }

    let install_hint = (!missing.is_empty()).then(|| platform.install_hint(&missing));
    DependencyReport {
        missing,
        install_hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Linux, MacOs};

    #[test]
    fn satisfied_when_everything_is_present() {
        let report = check_with(&Linux, |_| true);
        assert!(report.is_satisfied());
        assert_eq!(report.install_hint, None);
    }

    #[test]
    fn lists_missing_platform_tools_with_hint() {
        let report = check_with(&MacOs, |tool| tool != "diskutil");
        assert_eq!(report.missing, vec!["diskutil".to_string()]);
        assert_eq!(report.install_hint.as_deref(), Some("brew install diskutil"));
    }

    #[test]
    fn finds_sh_on_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-tool-4242").is_none());
    }
}
