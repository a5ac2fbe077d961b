//! Whole-file writes with explicit permission bits.
//!
//! Contents are staged in a temp file next to the destination, given their
//! final mode, and renamed into place.  A reader that opens the destination
//! after [`write_with_mode`] returns sees either the previous file or the
//! complete new one, never a partial or wrongly-permissioned file.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Owner read/write only.
pub const MODE_PRIVATE: u32 = 0o600;
/// Owner read/write, world readable.
pub const MODE_PUBLIC: u32 = 0o644;

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

/// Atomically replace `path` with `contents`, leaving it with `mode`.
pub fn write_with_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    write_staged(path, contents, mode, set_mode)
}

/// [`write_with_mode`] with the permission step supplied by the caller.  A
/// failing `chmod` discards the staged file and leaves `path` untouched.
fn write_staged<F>(path: &Path, contents: &str, mode: u32, chmod: F) -> Result<()>
where
    F: FnOnce(&Path, u32) -> Result<()>,
{
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    // NamedTempFile is created 0600 and unlinked on drop, so any early
    // return below leaves nothing readable behind.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;

    chmod(tmp.path(), mode)
        .with_context(|| format!("failed to set permissions for {}", path.display()))?;

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to move temp file into place: {}", path.display()))?;
    Ok(())
}

/// Set the permission bits of `path`.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod {:o} {}", mode, path.display()))
}

#[cfg(not(unix))]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    anyhow::bail!(
        "cannot set mode {:o} on {}: permission bits are unsupported on this platform",
        mode,
        path.display()
    )
}

/// Permission bits of `path` (lower nine bits only).
#[cfg(unix)]
pub fn mode_of(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn mode_of(path: &Path) -> Result<u32> {
    anyhow::bail!(
        "cannot read permissions of {}: permission bits are unsupported on this platform",
        path.display()
    )
}
