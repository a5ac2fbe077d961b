//! Post-write checks on the generated mirror configuration.

use std::path::Path;

use tracing::warn;

use super::list::REQUIRED_SETTINGS;
use crate::gpg;

/// The mirror list exists, carries every required setting and at least one
/// repository line.
pub fn verify_mirror_list(path: &Path) -> bool {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mirror list is not readable");
            return false;
        }
    };

    let missing: Vec<&str> = REQUIRED_SETTINGS
        .iter()
        .copied()
        .filter(|setting| !contents.contains(setting))
        .collect();
    if !missing.is_empty() {
        warn!(path = %path.display(), missing = ?missing, "mirror list lacks required settings");
        return false;
    }

    let has_repo = contents
        .lines()
        .any(|l| l.starts_with("deb ") || l.starts_with("deb-src "));
    if !has_repo {
        warn!(path = %path.display(), "mirror list contains no repositories");
    }
    has_repo
}

/// Every named entitlement has a key file in `gpg_dir`.
pub fn verify_gpg_keys<S: AsRef<str>>(gpg_dir: &Path, entitlements: &[S]) -> bool {
    let missing: Vec<&str> = entitlements
        .iter()
        .map(AsRef::as_ref)
        .filter(|ent| !gpg::key_path(gpg_dir, ent).exists())
        .collect();
    if missing.is_empty() {
        return true;
    }
    warn!(missing = %missing.join(", "), "missing GPG keys for entitlements");
    false
}
