//! Revision tokens.
//!
//! `_rev` is an opaque token of the form `N-<16 hex chars>`. The counter
//! strictly increases on every successful write; the tail is derived from the
//! prior token so independently evolved manifests do not collide on the same
//! counter value.

use sha1::{Digest, Sha1};

/// Revision of a manifest that has never been written.
pub const INITIAL_REVISION: &str = "0-0000000000000000";

/// Produces the successor of `old`. A malformed or empty token counts as
/// revision zero, so recovery from hand-edited storage still moves forward.
pub fn bump_revision(old: &str) -> String {
    let counter = old
        .split_once('-')
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    let next = counter + 1;

    let mut hasher = Sha1::new();
    hasher.update(old.as_bytes());
    hasher.update(next.to_be_bytes());
    let digest = hasher.finalize();

    format!("{}-{}", next, &hex::encode(digest)[..16])
}
