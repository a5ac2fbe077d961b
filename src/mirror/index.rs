//! Package-index parsing (`Packages` / `Sources` stanzas).
//!
//! An index is a sequence of records separated by blank lines, each record a
//! run of `Key: Value` lines.  Continuation lines (leading whitespace) and
//! lines without a colon are ignored; only the sizes matter here.

use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;

use crate::config::Architecture;

/// Totals for one package index.  Addition saturates at `u64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexTotals {
    pub bytes: u64,
    pub packages: u64,
}

impl std::ops::AddAssign for IndexTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes = self.bytes.saturating_add(rhs.bytes);
        self.packages = self.packages.saturating_add(rhs.packages);
    }
}

/// Path of the compressed index for `arch` below a repository base URL.
pub fn index_path(suite: &str, arch: Architecture) -> String {
    if arch.is_source() {
        format!("dists/{suite}/main/source/Sources.gz")
    } else {
        format!("dists/{suite}/main/binary-{arch}/Packages.gz")
    }
}

/// Sum the `Size` fields of every record in `content`.  A record with a
/// missing or unparseable `Size` counts as a package of zero bytes.
pub fn summarize_index(content: &str) -> IndexTotals {
    let mut totals = IndexTotals::default();
    let mut in_record = false;
    let mut record_size: u64 = 0;

    for line in content.lines() {
        if line.trim().is_empty() {
            if in_record {
                totals += IndexTotals { bytes: record_size, packages: 1 };
            }
            in_record = false;
            record_size = 0;
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        in_record = true;
        if key.trim() == "Size" {
            record_size = value.trim().parse().unwrap_or(0);
        }
    }

    if in_record {
        totals += IndexTotals { bytes: record_size, packages: 1 };
    }
    totals
}

/// Decompress a gzip-compressed index and summarise it.
pub fn summarize_gzip_index(compressed: &[u8]) -> Result<IndexTotals> {
    let mut decoder = GzDecoder::new(compressed);
    let mut content = String::new();
    decoder
        .read_to_string(&mut content)
        .context("failed to decompress package index")?;
    Ok(summarize_index(&content))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    pub(crate) fn gzip(content: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    const PACKAGES: &str = "\
Package: openssl
Version: 3.0.2-0ubuntu1.10+esm1
Size: 1000
Description: Secure Sockets Layer toolkit
 multi-line continuation: with a colon

Package: curl
Size: 250

Package: broken
Size: not-a-number

";

    #[test]
    fn index_paths() {
        assert_eq!(
            index_path("jammy-infra-security", Architecture::Amd64),
            "dists/jammy-infra-security/main/binary-amd64/Packages.gz"
        );
        assert_eq!(
            index_path("jammy", Architecture::Source),
            "dists/jammy/main/source/Sources.gz"
        );
    }

    #[test]
    fn sums_sizes_and_counts_records() {
        let totals = summarize_index(PACKAGES);
        assert_eq!(totals.packages, 3);
        assert_eq!(totals.bytes, 1250);
    }

    #[test]
    fn last_record_without_trailing_blank_line() {
        let totals = summarize_index("Package: a\nSize: 10\n\nPackage: b\nSize: 5");
        assert_eq!(totals, IndexTotals { bytes: 15, packages: 2 });
    }

    #[test]
    fn repeated_blank_lines_do_not_create_records() {
        let totals = summarize_index("\n\nPackage: a\nSize: 7\n\n\n\n");
        assert_eq!(totals, IndexTotals { bytes: 7, packages: 1 });
        assert_eq!(summarize_index(""), IndexTotals::default());
    }

    #[test]
    fn decompresses_gzip() {
        let totals = summarize_gzip_index(&gzip(PACKAGES)).unwrap();
        assert_eq!(totals.bytes, 1250);
        assert!(summarize_gzip_index(b"plain text").is_err());
    }

    #[test]
    fn totals_accumulate() {
        let mut t = IndexTotals { bytes: 1, packages: 1 };
        t += IndexTotals { bytes: 2, packages: 3 };
        assert_eq!(t, IndexTotals { bytes: 3, packages: 4 });
    }

    #[test]
    fn oversized_records_saturate() {
        let content = format!("Package: a\nSize: {max}\n\nPackage: b\nSize: {max}\n", max = u64::MAX);
        let totals = summarize_index(&content);
        assert_eq!(totals, IndexTotals { bytes: u64::MAX, packages: 2 });

        let mut t = IndexTotals { bytes: u64::MAX, packages: 1 };
        t += IndexTotals { bytes: 1, packages: 1 };
        assert_eq!(t.bytes, u64::MAX);
    }
}
