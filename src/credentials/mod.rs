//! Resource credentials.
//!
//! Holds the entitlement-type -> bearer-token mapping and renders the
//! credentials file consumed by the mirror tool.

pub mod authfile;
pub mod tokens;

pub use authfile::{verify_auth_file, write_auth_file};
pub use tokens::ResourceTokenStore;
