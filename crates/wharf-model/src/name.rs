//! Package name rules.
//!
//! Names follow the npm registry's constraints: lowercase, URL-safe, at most
//! 214 characters, no leading `.` or `_`, with an optional single
//! `@scope/` prefix. Everything that reaches a storage backend has passed
//! through [`validate_name`] first, so backends may treat names as safe path
//! components.

use crate::error::{ModelError, Result};

const MAX_NAME_LEN: usize = 214;

/// Validates a package name, scoped or plain.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ModelError::InvalidName(name.to_string()));
    }

    match name.strip_prefix('@') {
        Some(rest) => {
            let Some((scope, local)) = rest.split_once('/') else {
                return Err(ModelError::InvalidName(name.to_string()));
            };
            validate_segment(scope, name)?;
            validate_segment(local, name)
        }
        None => validate_segment(name, name),
    }
}

fn validate_segment(segment: &str, full: &str) -> Result<()> {
    if segment.is_empty() || segment.starts_with('.') || segment.starts_with('_') {
        return Err(ModelError::InvalidName(full.to_string()));
    }
    // rules out path traversal along with everything else npm rejects
    let ok = segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(ModelError::InvalidName(full.to_string()));
    }
    Ok(())
}

/// Conventional tarball filename for a `(name, version)` pair. The scope is
/// dropped: `@scope/pkg@1.0.0` ships as `pkg-1.0.0.tgz`.
pub fn tarball_filename(name: &str, version: &str) -> String {
    let local = name.rsplit('/').next().unwrap_or(name);
    format!("{local}-{version}.tgz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_scoped() {
        assert!(validate_name("foo").is_ok());
        assert!(validate_name("foo-bar.baz_qux").is_ok());
        assert!(validate_name("@scope/foo").is_ok());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("_private").is_err());
        assert!(validate_name("UPPER").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("@scope").is_err());
        assert!(validate_name("@scope/").is_err());
        assert!(validate_name("@/foo").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name(&"x".repeat(215)).is_err());
    }

    #[test]
    fn test_tarball_filename_strips_scope() {
        assert_eq!(tarball_filename("foo", "1.0.0"), "foo-1.0.0.tgz");
        assert_eq!(tarball_filename("@scope/foo", "2.1.0"), "foo-2.1.0.tgz");
    }
}
