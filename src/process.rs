//! External command execution

use crate::platform::{self, CommandSpec, Platform};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Trait for running external commands.
///
/// The engine only ever hands over structured [`CommandSpec`]s; everything
/// process-related (stdio wiring, detaching, exit codes) stays behind this
/// seam so tests can swap in a mock.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit status is an error.
    async fn run(&self, spec: &CommandSpec) -> Result<()>;

    /// Run to completion and capture trimmed stdout.
    async fn output(&self, spec: &CommandSpec) -> Result<String>;

    /// Spawn without waiting, for launchers that outlive the engine.
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<()>;

    /// Open `url` with the OS default handler.
    async fn open_external(&self, url: &str) -> Result<()>;
}

/// Production command runner using tokio::process.
pub struct SystemCommandRunner {
    platform: Platform,
}

impl SystemCommandRunner {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<()> {
        tracing::debug!(program = %spec.program, args = ?spec.args, "Running command");
        let status = Self::command(spec)
            .status()
            .await
            .with_context(|| format!("Failed to launch {}", spec.program))?;

        if !status.success() {
            anyhow::bail!("{} exited with {}", spec.program, status);
        }
        Ok(())
    }

    async fn output(&self, spec: &CommandSpec) -> Result<String> {
        let output = Self::command(spec)
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", spec.program))?;

        if !output.status.success() {
            anyhow::bail!("{} exited with {}", spec.program, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<()> {
        tracing::debug!(program = %spec.program, args = ?spec.args, "Spawning detached");
        let child = Self::command(spec)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", spec.program))?;

        // Detached on purpose: the child (server, installer UI) must outlive us.
        drop(child);
        Ok(())
    }

    async fn open_external(&self, url: &str) -> Result<()> {
        let spec = platform::open_url_command(self.platform, url);
        self.spawn_detached(&spec).await
    }
}
