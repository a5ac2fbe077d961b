//! Credentials file for the mirror tool and apt clients.
//!
//! One netrc-style line per resource token:
//!
//! ```text
//! machine esm.ubuntu.com/infra/ubuntu/ login bearer password <token>  # ubuntu-pro-client
//! ```

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use super::tokens::ResourceTokenStore;
use crate::contract::map_entitlement_to_repo_path;
use crate::fsutil;
use crate::mirror::url::{credential_host_path, BEARER_LOGIN};

/// Trailing comment tagging each line with the client that owns it.
const LINE_TAG: &str = "ubuntu-pro-client";

/// Render the credentials file.  Every token produces a line, in store
/// order, regardless of entitlement status.
pub fn render_auth_file(tokens: &ResourceTokenStore) -> String {
    let mut out = String::new();
    for (kind, token) in tokens.iter() {
        let host_path = credential_host_path(map_entitlement_to_repo_path(kind));
        writeln!(
            out,
            "machine {host_path} login {BEARER_LOGIN} password {token}  # {LINE_TAG}"
        )
        .unwrap();
    }
    out
}

/// Render and write the credentials file to `path` with mode 0600, creating
/// the parent directory when missing.  Any failure aborts the run.
#[instrument(skip(tokens), fields(path = %path.display(), entries = tokens.len()))]
pub fn write_auth_file(path: &Path, tokens: &ResourceTokenStore) -> Result<()> {
    let contents = render_auth_file(tokens);
    fsutil::write_with_mode(path, &contents, fsutil::MODE_PRIVATE)
        .with_context(|| format!("failed to create auth file: {}", path.display()))?;
    info!("auth file written");
    Ok(())
}

/// The credentials file exists and is readable by its owner only.
pub fn verify_auth_file(path: &Path) -> bool {
    if !path.exists() {
        warn!(path = %path.display(), "auth file does not exist");
        return false;
    }
    match fsutil::mode_of(path) {
        Ok(mode) if mode == fsutil::MODE_PRIVATE => true,
        Ok(mode) => {
            warn!(path = %path.display(), mode = %format!("{mode:o}"), "auth file has incorrect permissions");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to stat auth file");
            false
        }
    }
}
