//! Platform detection and command construction
//!
//! All OS-specific knowledge lives here as a strategy table producing
//! structured command descriptions (executable + args). The engine never
//! assembles shell strings outside the fixed scripts below.

use serde::Serialize;
use std::path::PathBuf;

/// Public download page, used by the manual install mode.
pub const SERVER_DOWNLOAD_PAGE: &str = "https://ollama.com/download";

/// Installer script piped to `sh` by the script install mode.
pub const SERVER_INSTALL_SCRIPT: &str = "https://ollama.com/install.sh";

/// Native installer binary for the Windows install mode.
pub const WINDOWS_INSTALLER_URL: &str = "https://ollama.com/download/OllamaSetup.exe";

/// Setup instructions for sandboxed workspaces where no scripted install
/// can run.
pub const SANDBOX_SETUP_DOCS: &str =
    "https://developers.redhat.com/articles/2024/08/12/integrate-private-ai-coding-assistant-ollama";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// True inside container workspaces where sudo is unavailable, which rules
/// out every scripted install path.
pub fn is_sandboxed_workspace() -> bool {
    std::env::var_os("DEVWORKSPACE_ID").is_some()
}

/// Structured command description consumed by the command runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Fixed shell sequence. Scripts are constants, so no escaping is ever
    /// required here.
    fn shell(script: &str) -> Self {
        Self::new("sh", &["-c", script])
    }
}

/// One viable install strategy, in the order the caller should offer them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallMode {
    pub id: String,
    pub label: String,
    pub supports_refresh: bool,
}

impl InstallMode {
    fn new(id: &str, label: &str, supports_refresh: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            supports_refresh,
        }
    }
}

/// Install strategies viable for `platform`, preference-ordered.
///
/// A sandboxed workspace short-circuits to its instructions-only mode; in
/// every other environment the manual fallback is present and last.
pub fn install_modes(platform: Platform, sandboxed: bool, homebrew: bool) -> Vec<InstallMode> {
    let mut modes = Vec::new();
    if platform == Platform::Linux {
        if sandboxed {
            return vec![InstallMode::new(
                "sandbox",
                "See sandboxed workspace instructions",
                false,
            )];
        }
        modes.push(InstallMode::new("script", "Install with script", true));
    }
    if homebrew {
        modes.push(InstallMode::new("homebrew", "Install with Homebrew", true));
    }
    if platform == Platform::Windows {
        modes.push(InstallMode::new("installer", "Install automatically", true));
    }
    modes.push(InstallMode::new("manual", "Install manually", true));
    modes
}

/// Command that launches the server for `platform`, or `None` when no
/// launch strategy exists.
pub fn start_command(platform: Platform) -> Option<CommandSpec> {
    match platform {
        Platform::Windows => Some(CommandSpec::new("cmd", &["/C", "start", "", "ollama app.exe"])),
        Platform::MacOs => Some(CommandSpec::new("open", &["-a", "Ollama"])),
        Platform::Linux => Some(CommandSpec::new("ollama", &["serve"])),
    }
}

/// Scripted install: requires curl, pipes the published installer script to
/// `sh`, then launches the server.
pub fn script_install_command() -> CommandSpec {
    let script = format!(
        "command -v curl >/dev/null 2>&1 || {{ echo >&2 \"curl is required but not installed. Aborting.\"; exit 1; }}; \
         curl -fsSL {SERVER_INSTALL_SCRIPT} | sh && ollama serve >/dev/null 2>&1 &"
    );
    CommandSpec::new("sh", &["-c", &script])
}

/// Homebrew install: cask install, then a first `ollama list` to warm the
/// server.
pub fn homebrew_install_command() -> CommandSpec {
    CommandSpec::shell("brew install --cask ollama && sleep 3 && ollama list")
}

/// Silent execution of a previously downloaded native installer.
pub fn installer_run_command(installer: &std::path::Path) -> CommandSpec {
    CommandSpec {
        program: installer.to_string_lossy().to_string(),
        args: vec!["/Silent".to_string()],
    }
}

/// Command opening `url` with the platform's default handler.
pub fn open_url_command(platform: Platform, url: &str) -> CommandSpec {
    match platform {
        Platform::Windows => CommandSpec::new("cmd", &["/C", "start", "", url]),
        Platform::MacOs => CommandSpec::new("open", &[url]),
        Platform::Linux => CommandSpec::new("xdg-open", &[url]),
    }
}

/// Look up an executable on PATH, honoring `PATHEXT`-free Windows `.exe`
/// resolution.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let candidate = dir.join(format!("{name}.exe"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Whether the server appears installed locally: on PATH, or at a known
/// per-platform install location.
pub fn server_installed(platform: Platform) -> bool {
    if find_executable("ollama").is_some() {
        return true;
    }
    match platform {
        Platform::MacOs => PathBuf::from("/Applications/Ollama.app").exists(),
        Platform::Windows => std::env::var_os("LOCALAPPDATA")
            .map(|base| {
                PathBuf::from(base)
                    .join("Programs")
                    .join("Ollama")
                    .join("ollama app.exe")
                    .exists()
            })
            .unwrap_or(false),
        Platform::Linux => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_short_circuits_catalog() {
        let modes = install_modes(Platform::Linux, true, true);
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].id, "sandbox");
        assert!(!modes[0].supports_refresh);
    }

    #[test]
    fn test_linux_modes_order() {
        let modes = install_modes(Platform::Linux, false, true);
        let ids: Vec<_> = modes.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["script", "homebrew", "manual"]);
    }

    #[test]
    fn test_windows_modes() {
        let modes = install_modes(Platform::Windows, false, false);
        let ids: Vec<_> = modes.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["installer", "manual"]);
    }

    #[test]
    fn test_manual_fallback_always_last() {
        for platform in [Platform::Windows, Platform::MacOs, Platform::Linux] {
            for homebrew in [false, true] {
                let modes = install_modes(platform, false, homebrew);
                assert_eq!(modes.last().unwrap().id, "manual");
            }
        }
    }

    #[test]
    fn test_start_command_per_platform() {
        assert_eq!(
            start_command(Platform::MacOs),
            Some(CommandSpec::new("open", &["-a", "Ollama"]))
        );
        assert_eq!(
            start_command(Platform::Linux),
            Some(CommandSpec::new("ollama", &["serve"]))
        );
        assert!(start_command(Platform::Windows).is_some());
    }

    #[test]
    fn test_installer_run_command_is_silent() {
        let spec = installer_run_command(std::path::Path::new("/tmp/OllamaSetup.exe"));
        assert_eq!(spec.args, vec!["/Silent"]);
    }

    #[test]
    fn test_open_url_command() {
        let spec = open_url_command(Platform::Linux, "https://ollama.com/download");
        assert_eq!(spec.program, "xdg-open");
        assert_eq!(spec.args, vec!["https://ollama.com/download"]);
    }
}
