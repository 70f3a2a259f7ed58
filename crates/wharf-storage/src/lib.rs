//! Storage backend contract for the wharf registry.
//!
//! A backend namespaces state per package: one manifest document plus the
//! package's tarball blobs, and a global index of known package names. The
//! engine treats every operation as suspending and requires per-package
//! linearizability only from [`StorageBackend::update_manifest`]; everything
//! else may run concurrently.
//!
//! The default implementation is the filesystem backend in [`fs`]. Search and
//! token persistence are optional capabilities; backends that do not carry
//! them report [`StorageError::Unsupported`].

pub mod error;
pub mod fs;
mod index;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use wharf_model::{Manifest, SearchItem};
use wharf_utils::CancelToken;

pub use error::{ErrorContext, Result, StorageError};
pub use fs::FsBackend;

/// A tarball read stream. Items are raw chunks in file order.
pub type TarballStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Manifest transform run inside [`StorageBackend::update_manifest`]. Pure
/// `(old) -> new`: implementations may re-run it when a concurrent write is
/// observed, so it must not carry side effects.
pub type Transform<'a> = Box<dyn FnMut(Manifest) -> Result<Manifest> + Send + 'a>;

/// An authentication token persisted on behalf of the auth layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub user: String,
    pub key: String,
    pub token: String,
    #[serde(default)]
    pub readonly: bool,
    pub created: String,
}

/// Atomic tarball writer. Bytes become visible to readers only at a
/// successful [`commit`](TarballSink::commit); dropping the sink beforehand
/// discards everything written so far and leaves any prior blob intact.
#[async_trait]
pub trait TarballSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Flushes, durably persists and atomically publishes the blob.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the pending write.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Per-package key-value + blob store. Package names have passed
/// [`wharf_model::validate_name`] before reaching a backend, so they are safe
/// to use as (possibly nested, for scopes) path components.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads a package manifest. `NotFound` when the package has none.
    async fn read_manifest(&self, name: &str) -> Result<Manifest>;

    /// Atomically replaces a package manifest, creating the package
    /// directory if needed. Readers see the old or the new document, never a
    /// partial write.
    async fn write_manifest(&self, name: &str, manifest: &Manifest) -> Result<()>;

    /// Creates the manifest of a new package. `Conflict` when one exists.
    async fn create_manifest(&self, name: &str, manifest: &Manifest) -> Result<()>;

    /// Serialized read-modify-write. Concurrent calls against the same name
    /// are linearizable; the transform is re-run if an intermediate write is
    /// observed. Returns the manifest as written.
    async fn update_manifest(&self, name: &str, transform: Transform<'_>) -> Result<Manifest>;

    /// Registers the package in the global index used by listing and search.
    async fn add_package(&self, name: &str) -> Result<()>;

    /// Removes the index entry and the package directory with everything in
    /// it.
    async fn remove_package(&self, name: &str) -> Result<()>;

    /// All package names currently in the global index.
    async fn list_packages(&self) -> Result<Vec<String>>;

    async fn open_tarball_read(&self, name: &str, filename: &str) -> Result<TarballStream>;

    async fn open_tarball_write(
        &self,
        name: &str,
        filename: &str,
        signal: CancelToken,
    ) -> Result<Box<dyn TarballSink>>;

    async fn delete_tarball(&self, name: &str, filename: &str) -> Result<()>;

    /// Optional capability: search over the package index.
    async fn search(&self, _query: &str) -> Result<Vec<SearchItem>> {
        Err(StorageError::Unsupported("search"))
    }

    /// Optional capability: token persistence.
    async fn save_token(&self, _token: Token) -> Result<()> {
        Err(StorageError::Unsupported("token storage"))
    }

    async fn delete_token(&self, _user: &str, _key: &str) -> Result<()> {
        Err(StorageError::Unsupported("token storage"))
    }

    async fn read_tokens(&self, _user: &str) -> Result<Vec<Token>> {
        Err(StorageError::Unsupported("token storage"))
    }
}
