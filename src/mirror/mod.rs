//! Mirror-tool configuration and size estimation.

pub mod estimator;
pub mod index;
pub mod list;
pub mod url;
pub mod usage;
pub mod validate;

pub use estimator::{SizeEstimate, SizeEstimator};
pub use list::{MirrorList, MirrorListBuilder};
pub use usage::{disk_usage, DiskUsage};
pub use validate::{verify_gpg_keys, verify_mirror_list};
