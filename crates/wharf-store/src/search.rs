//! Search over the local package index.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use wharf_model::SearchPackageBody;
use wharf_storage::StorageBackend;

use crate::error::Result;
use crate::local::LocalStore;

/// Stream of enriched search results. Manifests are loaded lazily, one per
/// poll, so a slow consumer never forces the whole result set into memory.
pub type SearchStream = Pin<Box<dyn Stream<Item = Result<SearchPackageBody>> + Send>>;

pub(crate) async fn search_local(
    backend: Arc<dyn StorageBackend>,
    local: LocalStore,
    query: &str,
) -> Result<SearchStream> {
    let hits = backend.search(query).await?;

    let stream = futures::stream::unfold(
        (local, hits.into_iter()),
        |(local, mut hits)| async move {
            loop {
                let hit = hits.next()?;
                match local.get_manifest(&hit.name).await {
                    Ok(manifest) => {
                        // packages without versions are skipped entirely
                        if let Some(body) = SearchPackageBody::project(&manifest) {
                            return Some((Ok(body), (local, hits)));
                        }
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Some((Err(err), (local, hits))),
                }
            }
        },
    );
    Ok(Box::pin(stream))
}
