//! Disk usage of an existing mirror tree.

use std::path::Path;

use super::estimator::human_readable;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub bytes: u64,
    pub readable: String,
    pub files: u64,
    pub dirs: u64,
}

/// Sizes below 1 KiB are shown in bytes; larger ones as in
/// [`human_readable`].
fn readable_usage(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        human_readable(bytes)
    }
}

/// Walk `root` and total its regular files.  `dirs` includes `root`
/// itself.  A missing directory reports zeros; unreadable entries are
/// skipped.
pub fn disk_usage(root: &Path) -> DiskUsage {
    let mut usage = DiskUsage::default();

    if root.is_dir() {
        usage.dirs = 1;
        let mut stack = vec![root.to_path_buf()];
        while let Some(current) = stack.pop() {
            let entries = match std::fs::read_dir(&current) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if meta.is_dir() {
                    usage.dirs += 1;
                    stack.push(entry.path());
                } else {
                    usage.files += 1;
                    usage.bytes = usage.bytes.saturating_add(meta.len());
                }
            }
        }
    }

    usage.readable = readable_usage(usage.bytes);
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let usage = disk_usage(&tmp.path().join("mirror"));
        assert_eq!(usage.bytes, 0);
        assert_eq!(usage.files, 0);
        assert_eq!(usage.dirs, 0);
        assert_eq!(usage.readable, "0 B");
    }

    #[test]
    fn counts_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let pool = root.join("esm.ubuntu.com/infra/ubuntu/pool");
        std::fs::create_dir_all(&pool).unwrap();
        std::fs::write(pool.join("a.deb"), vec![0u8; 1024]).unwrap();
        std::fs::write(pool.join("b.deb"), vec![0u8; 512]).unwrap();
        std::fs::write(root.join("index"), b"x").unwrap();

        let usage = disk_usage(root);
        assert_eq!(usage.bytes, 1537);
        assert_eq!(usage.files, 3);
        assert_eq!(usage.dirs, 5);
        assert_eq!(usage.readable, "1.50 KB");
    }

    #[test]
    fn empty_root_counts_itself() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Release"), b"abc").unwrap();

        let usage = disk_usage(tmp.path());
        assert_eq!(usage.dirs, 1);
        assert_eq!(usage.files, 1);
        assert_eq!(usage.readable, "3 B");
    }
}
