//! Data model for the wharf package registry.
//!
//! This crate defines the package manifest document and everything that keeps
//! it well-formed: field normalization, `__proto__` stripping, revision
//! tokens, package name validation, and the projections used by search.
//!
//! The manifest mirrors the npm wire format. Unknown fields are preserved
//! round-trip so wharf can cache upstream documents without understanding
//! every key in them.

pub mod error;
pub mod manifest;
pub mod name;
pub mod revision;
pub mod search;
pub mod time;
pub mod version;

pub use error::{ModelError, Result};
pub use manifest::{Attachment, DistFile, Manifest, UplinkRecord};
pub use name::{tarball_filename, validate_name};
pub use revision::{bump_revision, INITIAL_REVISION};
pub use search::{SearchItem, SearchLinks, SearchPackageBody};
pub use version::{compare_versions, Dist, Person, Version};
