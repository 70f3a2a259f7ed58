//! The wharf storage/federation engine.
//!
//! Two layers compose here. [`LocalStore`] owns manifest semantics over a
//! pluggable [`wharf_storage::StorageBackend`]: normalization, revision
//! bookkeeping, publish/unpublish/deprecate/dist-tag mutations, and the
//! merge of remote metadata into the cache. [`FederatedStore`] coordinates
//! the local store with the configured uplinks: read-through manifests,
//! write-through tarball caching, dist-URL rewriting and search.
//!
//! The HTTP, auth and UI layers are external callers of these types; the
//! engine itself never routes requests or evaluates permissions.

pub mod error;
pub mod federated;
pub mod local;
pub mod search;
mod urls;

pub use error::{Result, StoreError};
pub use federated::{
    FederatedStore, GetOptions, PackageStream, PublishSink, RequestContext,
};
pub use local::LocalStore;
pub use search::SearchStream;
