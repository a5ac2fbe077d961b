//! Narrow interface over the host operating system.
//!
//! Everything that mutates the machine outside the provisioning directory
//! (package installs, external tools, permission changes on files produced by
//! those tools) goes through [`SystemOps`], so the provisioning core can be
//! exercised against a fake without touching the real OS.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Host operations required by the provisioning flow.
#[async_trait::async_trait]
pub trait SystemOps: Send + Sync {
    /// Install distribution packages by name.
    async fn install_packages(&self, packages: &[&str]) -> Result<()>;

    /// Run `program` with `args` and return its stdout.  A non-zero exit
    /// status is an error carrying the trimmed stderr.
    async fn run_command(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Set the permission bits of `path`.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Host implementation
// ---------------------------------------------------------------------------

/// [`SystemOps`] backed by the real machine.
#[derive(Debug, Default, Clone)]
pub struct HostSystem;

#[async_trait::async_trait]
impl SystemOps for HostSystem {
    #[instrument(skip(self))]
    async fn install_packages(&self, packages: &[&str]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        self.run_command("apt-get", &["update"]).await?;

        let mut args = vec!["install", "-yq"];
        args.extend_from_slice(packages);
        self.run_command("apt-get", &args).await?;

        info!(count = packages.len(), "packages installed");
        Ok(())
    }

    #[instrument(skip(self, args))]
    async fn run_command(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{program} failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        debug!(program, "command completed");
        String::from_utf8(output.stdout)
            .with_context(|| format!("{program} produced non-UTF-8 output"))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        crate::fsutil::set_mode(path, mode)
    }
}

// ---------------------------------------------------------------------------
// Recording fake
// ---------------------------------------------------------------------------
