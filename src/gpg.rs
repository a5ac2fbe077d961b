//! Repository signing keys.
//!
//! One dearmored keyring per entitlement type, fetched from the Ubuntu
//! keyserver using the contract's `aptKey` fingerprint.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::contract::Entitlement;
use crate::fsutil;
use crate::system::SystemOps;

const KEYSERVER_LOOKUP: &str = "https://keyserver.ubuntu.com/pks/lookup?op=get&search=0x";

/// Keyring file for `entitlement` inside `gpg_dir`.
pub fn key_path(gpg_dir: &Path, entitlement: &str) -> PathBuf {
    gpg_dir.join(format!("ubuntu-{entitlement}.gpg"))
}

pub fn key_url(fingerprint: &str) -> String {
    format!("{KEYSERVER_LOOKUP}{fingerprint}")
}

/// `(entitlement type, fingerprint)` for every entitlement carrying an
/// `aptKey`.  A type listed more than once keeps its last key.
fn signing_keys(entitlements: &[Entitlement]) -> Vec<(&str, &str)> {
    let mut keys: Vec<(&str, &str)> = Vec::new();
    for ent in entitlements {
        let Some(fingerprint) = ent.apt_key.as_deref() else {
            continue;
        };
        match keys.iter_mut().find(|(kind, _)| *kind == ent.kind.as_str()) {
            Some(slot) => slot.1 = fingerprint,
            None => keys.push((ent.kind.as_str(), fingerprint)),
        }
    }
    keys
}

/// Download and dearmor each entitlement's signing key into `gpg_dir`,
/// world-readable.  Returns the number of keys written.
#[instrument(skip_all, fields(gpg_dir = %gpg_dir.display()))]
pub async fn download_gpg_keys(
    system: &dyn SystemOps,
    gpg_dir: &Path,
    entitlements: &[Entitlement],
) -> Result<usize> {
    std::fs::create_dir_all(gpg_dir)
        .with_context(|| format!("failed to create GPG directory: {}", gpg_dir.display()))?;

    let keys = signing_keys(entitlements);
    for (kind, fingerprint) in &keys {
        let path = key_path(gpg_dir, kind);
        let pipeline = format!(
            "wget -qO- '{}' | gpg --dearmor > '{}'",
            key_url(fingerprint),
            path.display()
        );
        system
            .run_command("sh", &["-c", &pipeline])
            .await
            .with_context(|| format!("failed to download GPG key for {kind}"))?;
        system.set_mode(&path, fsutil::MODE_PUBLIC)?;
        info!(entitlement = %kind, path = %path.display(), "GPG key downloaded");
    }

    info!(count = keys.len(), "GPG keys downloaded");
    Ok(keys.len())
}
